//! Admin password prompt.
//!
//! Input is masked and held in `Zeroizing` buffers. Enter submits,
//! Escape cancels. A rejected attempt reopens the prompt with an error.

use super::{Modal, ModalResult};
use egui::{Align2, Color32, Context, Id, Key, RichText, Vec2};
use zeroize::Zeroizing;

pub struct PasswordDialog {
    visible: bool,
    input: Zeroizing<String>,
    outcome: ModalResult<Zeroizing<String>>,
    prompt: String,
    error: Option<String>,
    id: Id,
}

impl PasswordDialog {
    pub fn new(id: impl std::hash::Hash) -> Self {
        Self {
            visible: false,
            input: Zeroizing::default(),
            outcome: ModalResult::Pending,
            prompt: String::new(),
            error: None,
            id: Id::new(id),
        }
    }

    fn show_prompt(&mut self, prompt: String, error: Option<String>) {
        self.visible = true;
        self.prompt = prompt;
        self.error = error;
        self.outcome = ModalResult::Pending;
        self.input = Zeroizing::default();
    }

    /// Reopen with an error after a rejected attempt.
    pub fn set_error(&mut self, error: impl Into<String>) {
        let prompt = std::mem::take(&mut self.prompt);
        self.show_prompt(prompt, Some(error.into()));
    }

    pub fn take_result(&mut self) -> ModalResult<Zeroizing<String>> {
        std::mem::replace(&mut self.outcome, ModalResult::Pending)
    }

    fn submit(&mut self) {
        self.outcome = ModalResult::Confirmed(std::mem::take(&mut self.input));
    }

    fn dismiss(&mut self) {
        self.visible = false;
        self.error = None;
        self.input = Zeroizing::default();
    }
}

impl Modal for PasswordDialog {
    fn update(&mut self, ctx: &Context) -> bool {
        if !self.visible {
            return false;
        }

        let mut done = ctx.input(|i| i.key_pressed(Key::Escape));
        if done {
            self.outcome = ModalResult::Cancelled;
        }

        egui::Window::new("🔐 Admin Unlock")
            .id(self.id)
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, Vec2::ZERO)
            .show(ctx, |ui| {
                ui.set_min_width(320.0);
                if !self.prompt.is_empty() {
                    ui.label(&self.prompt);
                }
                if let Some(error) = &self.error {
                    ui.label(RichText::new(error).color(Color32::RED));
                }
                ui.add_space(6.0);

                let field = ui.add(
                    egui::TextEdit::singleline(&mut *self.input)
                        .password(true)
                        .hint_text("Admin password")
                        .desired_width(f32::INFINITY),
                );
                if !field.has_focus() && self.error.is_some() {
                    field.request_focus();
                }
                let entered = field.lost_focus() && ui.input(|i| i.key_pressed(Key::Enter));

                ui.add_space(10.0);
                ui.horizontal(|ui| {
                    let has_input = !self.input.is_empty();
                    let clicked = ui
                        .add_enabled(has_input, egui::Button::new("Unlock"))
                        .clicked();
                    if has_input && (clicked || entered) {
                        self.submit();
                        done = true;
                    }
                    if ui.button("Cancel").clicked() {
                        self.outcome = ModalResult::Cancelled;
                        done = true;
                    }
                });
                ui.label(
                    RichText::new("Unlock lasts until the app closes")
                        .small()
                        .weak(),
                );
            });

        if done {
            self.dismiss();
        }
        done
    }

    fn is_open(&self) -> bool {
        self.visible
    }

    fn open(&mut self) {
        self.show_prompt("Enter the admin password to enable reset:".into(), None);
    }

    fn close(&mut self) {
        self.dismiss();
        self.outcome = ModalResult::Cancelled;
    }
}
