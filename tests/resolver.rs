use assert_matches::assert_matches;

use tunedrop::error::BotError;
use tunedrop::resolver::parse_saved_songs;

const SAVED: &str = r#"[
  {
    "name": "Kuzu Kuzu",
    "artists": ["Tarkan"],
    "artist": "Tarkan",
    "album_name": "Karma",
    "duration": 244,
    "url": "https://open.spotify.com/track/1",
    "song_id": "1"
  },
  {
    "name": "No Artist Field",
    "artists": ["Duman", "Guest"],
    "duration": 201.6,
    "url": "https://open.spotify.com/track/2"
  },
  {
    "name": "Unplayable",
    "artist": "Nobody",
    "duration": 100,
    "url": ""
  }
]"#;

#[test]
fn parses_songs_in_order_and_drops_unaddressable_ones() {
    let songs = parse_saved_songs(SAVED).unwrap();
    assert_eq!(songs.len(), 2);

    assert_eq!(songs[0].title, "Kuzu Kuzu");
    assert_eq!(songs[0].artist, "Tarkan");
    assert_eq!(songs[0].album.as_deref(), Some("Karma"));
    assert_eq!(songs[0].duration_seconds, 244);

    assert_eq!(songs[1].artist, "Duman");
    assert_eq!(songs[1].duration_seconds, 202);
    assert_eq!(songs[1].display_name(), "No Artist Field - Duman");
}

#[test]
fn empty_save_file_means_not_found() {
    assert!(parse_saved_songs("[]").unwrap().is_empty());
}

#[test]
fn garbage_is_a_resolve_error() {
    assert_matches!(parse_saved_songs("<html>"), Err(BotError::Resolve(_)));
}
