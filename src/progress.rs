/// Progress reporting for a flashing session.
///
/// A session reports one running byte count across both transfer
/// directions: writing and reading back each account for the image once,
/// so a fully verified session moves twice the image's byte count.
pub trait ProgressCallbacks {
    /// A session that will move `total` bytes is starting.
    fn begin(&mut self, total: usize);
    /// The transfer has reached `current` bytes; the chunk at `address`
    /// was just completed.
    fn advance(&mut self, address: u32, current: usize);
    /// The session's transfers are done.
    fn end(&mut self);
}
