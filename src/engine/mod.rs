pub mod dispatch;
pub mod intake;
pub mod locator;
pub mod selection;
