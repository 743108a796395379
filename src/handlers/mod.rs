pub mod common;
pub mod upload;
pub mod video;

pub use upload::{get_queue, upload_video};
pub use video::delete_video;
