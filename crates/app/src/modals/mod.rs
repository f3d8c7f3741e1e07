//! Modal dialogs.

pub mod password_dialog;

pub use password_dialog::PasswordDialog;

use egui::Context;

pub trait Modal {
    /// Update and render the modal. Returns true if the modal should close.
    fn update(&mut self, ctx: &Context) -> bool;

    fn is_open(&self) -> bool;

    fn open(&mut self);

    fn close(&mut self);
}

#[derive(Debug, Clone)]
pub enum ModalResult<T> {
    Pending,
    Confirmed(T),
    Cancelled,
}
