//! Terminal front end: the event panel shared by the `tick3t` binary.

pub mod panel;

pub use panel::PurchasePanel;
