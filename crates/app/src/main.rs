//! Dual-LLM Chat Playground: one prompt, a cloud model and a local model
//! answering side by side.

mod config;
mod modals;
mod secrets;
mod state;
mod utils;

use chat_host::Orchestrator;
use modals::{Modal, ModalResult};
use parking_lot::Mutex;
use providers::{LocalStatus, OllamaRunner, OpenAIClient};
use shared::chat::{Message, Role};
use shared::error::ChatError;
use shared::settings::{MAX_TOKENS_MAX, MAX_TOKENS_MIN, MAX_TOKENS_STEP, TEMPERATURE_MAX, TEMPERATURE_MIN};
use state::{AppState, PaneBody, PaneView};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use utils::{budget_fraction, format_budget, format_latency, STREAM_CURSOR};

const APP_TITLE: &str = "Dual-LLM Chat Playground";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut settings = config::load_settings_or_default();
    config::apply_env_overrides(&mut settings);

    // No API key, no window.
    let creds = secrets::Credentials::resolve().map_err(|e| {
        error!("{}", e);
        e
    })?;

    let cloud = OpenAIClient::new(&creds.openai_api_key, settings.openai_base_url.as_deref());
    let local = OllamaRunner::new(
        settings.local_runner.tool.clone(),
        Duration::from_secs(settings.local_runner.timeout_secs),
    );
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(cloud), Arc::new(local)));
    let budget_file = config::budget_file(&settings);
    info!("budget file: {}", budget_file.display());

    let state = AppState::new(settings, orchestrator, budget_file, creds.admin_password);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title(APP_TITLE),
        vsync: true,
        ..Default::default()
    };
    eframe::run_native(
        APP_TITLE,
        options,
        Box::new(move |_cc| {
            Box::new(DualChatApp {
                state: Arc::new(Mutex::new(state)),
            })
        }),
    )
    .map_err(|e| anyhow::anyhow!("window error: {}", e))
}

struct DualChatApp {
    state: Arc<Mutex<AppState>>,
}

impl eframe::App for DualChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let mut guard = self.state.lock();
        let s = &mut *guard;

        s.poll_worker();
        if s.is_busy() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        if s.password_dialog.update(ctx) {
            if let ModalResult::Confirmed(attempt) = s.password_dialog.take_result() {
                match s.unlock_admin(&attempt) {
                    Ok(()) => s.status = Some("Admin unlocked.".into()),
                    Err(e @ ChatError::AuthFailure) => s.password_dialog.set_error(e.to_string()),
                    Err(e) => s.status = Some(e.to_string()),
                }
            }
        }

        let settings_changed = settings_panel(ctx, s);
        if settings_changed {
            config::save_settings(&s.settings);
        }

        egui::TopBottomPanel::bottom("footer").show(ctx, |ui| {
            ui.add_space(2.0);
            ui.label(
                egui::RichText::new(format!(
                    "Cloud: OpenAI chat completions (billed against the budget) · Local: `{}` on this machine · UI: egui",
                    s.local_tool()
                ))
                .small()
                .weak(),
            );
        });

        egui::TopBottomPanel::bottom("input_panel").show(ctx, |ui| {
            ui.add_space(6.0);
            ui.horizontal(|ui| {
                let busy = s.is_busy();
                let width = ui.available_width() - 80.0;
                let response = ui.add_enabled(
                    !busy,
                    egui::TextEdit::singleline(&mut s.input_text)
                        .hint_text("Type your message here...")
                        .desired_width(width),
                );
                let enter = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                let send = ui
                    .add_enabled(!busy && !s.input_text.trim().is_empty(), egui::Button::new("Send"))
                    .clicked();
                if enter || send {
                    s.submit(Some(ctx.clone()));
                    response.request_focus();
                }
            });
            ui.add_space(6.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(format!("🤖 {}", APP_TITLE));
            ui.add_space(6.0);

            let dark = ui.visuals().dark_mode;
            let history_height = (ui.available_height() * 0.45).max(120.0);
            egui::ScrollArea::vertical()
                .id_source("history")
                .max_height(history_height)
                .stick_to_bottom(true)
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    if s.transcript.is_empty() {
                        ui.label(egui::RichText::new("No messages yet.").weak());
                    }
                    for msg in &s.transcript {
                        render_message(ui, msg, dark);
                        ui.add_space(6.0);
                    }
                });

            ui.separator();

            let cloud_model = s.settings.selected_cloud.clone();
            let local_model = s.settings.selected_local.clone();
            ui.columns(2, |cols| {
                render_pane(&mut cols[0], "☁️ Cloud", &cloud_model, &s.cloud_pane);
                render_pane(&mut cols[1], "💻 Local", &local_model, &s.local_pane);
            });
        });
    }
}

/// Left panel. Returns true if any persisted setting changed.
fn settings_panel(ctx: &egui::Context, s: &mut AppState) -> bool {
    let mut changed = false;
    let busy = s.is_busy();

    egui::SidePanel::left("settings_panel")
        .resizable(false)
        .default_width(260.0)
        .show(ctx, |ui| {
            ui.add_space(6.0);
            ui.heading("⚙️ Settings");
            ui.add_space(8.0);

            ui.add_enabled_ui(!busy, |ui| {
                let cloud_models = s.settings.cloud_models.clone();
                ui.label("Cloud model");
                egui::ComboBox::from_id_source("cloud_model")
                    .selected_text(s.settings.selected_cloud.clone())
                    .show_ui(ui, |ui| {
                        for m in &cloud_models {
                            changed |= ui
                                .selectable_value(&mut s.settings.selected_cloud, m.clone(), m)
                                .changed();
                        }
                    });

                let local_models = s.settings.local_models.clone();
                ui.label("Local model");
                egui::ComboBox::from_id_source("local_model")
                    .selected_text(s.settings.selected_local.clone())
                    .show_ui(ui, |ui| {
                        for m in &local_models {
                            changed |= ui
                                .selectable_value(&mut s.settings.selected_local, m.clone(), m)
                                .changed();
                        }
                    });

                ui.add_space(8.0);
                changed |= ui
                    .add(
                        egui::Slider::new(&mut s.settings.temperature, TEMPERATURE_MIN..=TEMPERATURE_MAX)
                            .step_by(0.05)
                            .text("Temperature"),
                    )
                    .changed();
                changed |= ui
                    .add(
                        egui::Slider::new(&mut s.settings.max_tokens, MAX_TOKENS_MIN..=MAX_TOKENS_MAX)
                            .step_by(MAX_TOKENS_STEP as f64)
                            .text("Max tokens"),
                    )
                    .changed();

                ui.add_space(8.0);
                if ui
                    .checkbox(&mut s.settings.local_enabled, "Enable local model")
                    .changed()
                {
                    s.refresh_local_status();
                    changed = true;
                }
                changed |= ui
                    .checkbox(&mut s.settings.stream, "Stream cloud replies")
                    .changed();
            });

            if let LocalStatus::Unavailable { .. } = s.local_status {
                if let Some(notice) = s.local_status.notice() {
                    ui.colored_label(egui::Color32::from_rgb(220, 160, 60), notice);
                }
            }

            ui.add_space(12.0);
            ui.separator();
            ui.label(egui::RichText::new("💰 Budget").strong());
            let ceiling = s.settings.budget.ceiling;
            ui.add(
                egui::ProgressBar::new(budget_fraction(s.budget_used, ceiling))
                    .show_percentage(),
            );
            ui.label(egui::RichText::new(format_budget(s.budget_used, ceiling)).small());
            if s.remaining_budget() <= 0.0 {
                ui.colored_label(egui::Color32::RED, "Budget exhausted. Cloud model disabled.");
            }

            ui.add_space(12.0);
            ui.separator();
            ui.label(egui::RichText::new("🔐 Admin").strong());
            ui.add_enabled_ui(!busy, |ui| {
                if !s.admin_available {
                    ui.label(egui::RichText::new("No admin password configured.").weak());
                } else if !s.admin_unlocked {
                    if ui.button("Unlock admin").clicked() {
                        s.password_dialog.open();
                    }
                } else if ui.button("🗑 Reset history and budget").clicked() {
                    s.admin_reset();
                }
            });

            if let Some(status) = &s.status {
                ui.add_space(8.0);
                ui.label(egui::RichText::new(status).small());
            }
        });

    changed
}

fn render_message(ui: &mut egui::Ui, msg: &Message, dark: bool) {
    if msg.role() == Role::User {
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Min), |ui| {
            ui.add_space(8.0);
            egui::Frame::none()
                .fill(egui::Color32::from_rgb(70, 130, 180))
                .rounding(egui::Rounding::same(12.0))
                .inner_margin(egui::Margin::same(10.0))
                .show(ui, |ui| {
                    ui.set_max_width(500.0);
                    ui.label(
                        egui::RichText::new(msg.content())
                            .color(egui::Color32::WHITE)
                            .size(15.0),
                    );
                });
        });
        return;
    }

    let speaker = match msg.role() {
        Role::AssistantLocal => "💻 Local",
        _ => "☁️ Cloud",
    };
    egui::Frame::none()
        .fill(if dark {
            egui::Color32::from_rgb(50, 50, 58)
        } else {
            egui::Color32::from_rgb(245, 245, 248)
        })
        .rounding(egui::Rounding::same(12.0))
        .inner_margin(egui::Margin::same(10.0))
        .show(ui, |ui| {
            ui.set_max_width(600.0);
            ui.label(egui::RichText::new(speaker).small().weak());
            ui.label(egui::RichText::new(msg.content()).size(15.0));
        });
}

fn render_pane(ui: &mut egui::Ui, kind: &str, selected_model: &str, pane: &PaneView) {
    let model = if pane.body == PaneBody::Idle {
        selected_model
    } else {
        pane.model.as_str()
    };
    ui.horizontal(|ui| {
        ui.label(egui::RichText::new(format!("{} · {}", kind, model)).strong());
        if let Some(latency) = pane.latency {
            ui.label(egui::RichText::new(format_latency(latency)).small().weak());
        }
    });
    ui.add_space(4.0);

    egui::ScrollArea::vertical()
        .id_source(kind)
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .show(ui, |ui| match &pane.body {
            PaneBody::Idle => {
                ui.label(egui::RichText::new("Waiting for a message.").weak());
            }
            PaneBody::Working => {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label("Thinking...");
                });
            }
            PaneBody::Streaming(text) => {
                ui.label(format!("{}{}", text, STREAM_CURSOR));
            }
            PaneBody::Reply(text) => {
                ui.label(text.trim_end());
            }
            PaneBody::Notice(text) => {
                ui.label(egui::RichText::new(text).italics().weak());
            }
            PaneBody::Error(text) => {
                ui.colored_label(egui::Color32::from_rgb(220, 80, 80), text);
            }
        });
}
