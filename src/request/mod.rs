//! 块请求
//!
//! 请求由一个起始扇区和若干数据段组成。分派器按段顺序依次服务，
//! 任何一段失败即中止，已完成的字节数随完成结果一并上报。

pub mod completion;
mod dispatch;
mod types;

pub use completion::{CompletionOutcome, OutcomeStatus};
pub use types::{BlockStatus, ReqOp, Request, RequestState, Segment};
