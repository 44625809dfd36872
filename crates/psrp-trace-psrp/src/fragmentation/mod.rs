mod defragmenter;
mod fragment;

pub use defragmenter::{CompletedPsrpObject, Defragmenter};
pub use fragment::{Fragment, HEADER_LEN};
