// Async frame IO and decode-error logging on top of cometload-wire.
pub(crate) use self::decode_log::log_decode_error;
pub(crate) use self::frame_io::{read_frame, write_frame};

mod decode_log;
mod frame_io;
