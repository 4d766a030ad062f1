//! 请求队列基础设施
//!
//! 单硬件队列、有界队列深度的标签集。请求在进入分派器前必须取得标签，
//! 设备关闭前等待所有标签归还。

mod tag_set;

pub use tag_set::{QueueFlags, Tag, TagSet};
