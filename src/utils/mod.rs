//! 内部工具函数

/// 自旋等待中的一次让步
///
/// 有线程调度时让出时间片，否则提示 CPU 处于自旋。
#[cfg(any(feature = "std", test))]
pub(crate) fn relax() {
    std::thread::yield_now();
}

#[cfg(not(any(feature = "std", test)))]
pub(crate) fn relax() {
    core::hint::spin_loop();
}
