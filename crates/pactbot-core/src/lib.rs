//! Foundational low-level utilities shared across pactbot crates.
//!
//! Provides the injectable clock used by the aggregator, atomic file-write
//! helpers, and wall-clock time utilities.

pub mod atomic_io;
pub mod clock;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use clock::{Clock, ManualClock, SystemClock};
pub use time_utils::current_unix_timestamp_ms;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn system_clock_tracks_wall_clock() {
        let before = current_unix_timestamp_ms();
        let observed = SystemClock.now_unix_ms();
        let after = current_unix_timestamp_ms();
        assert!(observed >= before);
        assert!(observed <= after);
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/state.json");
        write_text_atomic(&path, "{}\n").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "{}\n");
    }

    #[test]
    fn write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory must fail");
        assert!(error.to_string().contains("is a directory"));
    }
}
