mod local_progress;
pub(crate) mod playback;

pub use local_progress::{FINISHED_PROGRESS_THRESHOLD, LocalMediaProgress};
pub use playback::{AudioTrack, Chapter, Media, PlayMethod, PlaybackSession, UnknownPlayMethod};
