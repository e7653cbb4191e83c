//! ChatVerse Desktop — egui app state and UI.
//!
//! All backend work runs on a background tokio runtime; results come back
//! through `std::sync::mpsc` receivers polled once per frame.

use eframe::egui;
use lib::backend::{AuthBackend, ChatBackend, FirebaseBackend, MemoryBackend, StoreError};
use lib::config;
use lib::grouping;
use lib::guard::{GateState, SessionGuard};
use lib::members::MembersPanel;
use lib::menu::{self, ContextMenuState, PressTracker};
use lib::model::{AuthUser, MessageId, MessageScope, UserProfile};
use lib::routes::Route;
use lib::view::ChatView;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Assumed message context menu footprint: Reply + Delete.
const MESSAGE_MENU_ITEMS: usize = 2;

const BUBBLE_MAX_WIDTH: f32 = 420.0;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Login,
    Signup,
    Chat,
}

/// Live backend handles shared by every in-flight operation.
struct Services {
    rt: tokio::runtime::Runtime,
    auth: Arc<dyn AuthBackend>,
    chat: Arc<dyn ChatBackend>,
    /// True when running against the in-memory demo backend.
    demo: bool,
}

fn build_services(rt: tokio::runtime::Runtime) -> anyhow::Result<Services> {
    let (config, _) = config::load_config(None)?;
    if config::has_backend_project(&config) {
        let backend = Arc::new(FirebaseBackend::from_config(&config)?);
        let auth: Arc<dyn AuthBackend> = backend.clone();
        let chat: Arc<dyn ChatBackend> = backend;
        return Ok(Services { rt, auth, chat, demo: false });
    }
    log::warn!("no backend project configured, falling back to the in-memory demo backend");
    let backend = Arc::new(MemoryBackend::new());
    let auth: Arc<dyn AuthBackend> = backend.clone();
    let chat: Arc<dyn ChatBackend> = backend;
    Ok(Services { rt, auth, chat, demo: true })
}

pub struct ChatVerseApp {
    services: Services,
    /// Fatal startup problem (bad config); renders an error screen only.
    boot_error: Option<String>,

    current_screen: Screen,

    // Auth forms.
    email_input: String,
    password_input: String,
    name_input: String,
    /// Auth provider rejection shown in a blocking dialog, verbatim.
    auth_error: Option<String>,
    /// When Some, a sign-in/sign-up is in flight; we read the result here.
    auth_receiver: Option<mpsc::Receiver<Result<AuthUser, String>>>,

    /// When Some, the startup session guard has not resolved yet.
    gate_receiver: Option<mpsc::Receiver<GateState>>,

    user: Option<AuthUser>,

    /// The open conversation (shared room or a private chat).
    view: Option<ChatView>,
    /// The private-chat peer; None means the shared room.
    dm_peer: Option<UserProfile>,
    /// When Some, a view open is in flight; we read the result here.
    view_receiver: Option<mpsc::Receiver<Result<ChatView, String>>>,

    /// In-flight sends, tagged with the scope they were composed in.
    /// Overlapping sends are allowed; nothing queues or de-duplicates.
    pending_sends: Vec<(MessageScope, mpsc::Receiver<Result<MessageId, StoreError>>)>,

    members_open: bool,
    members: Option<MembersPanel>,
    /// When Some, the roster fetch is in flight; we read the panel here.
    members_receiver: Option<mpsc::Receiver<Result<MembersPanel, String>>>,

    context_menu: ContextMenuState,
    press: PressTracker,
}

impl ChatVerseApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, rt: tokio::runtime::Runtime) -> Self {
        let (services, boot_error) = match build_services(rt) {
            Ok(services) => (services, None),
            Err(e) => {
                // Placeholder services; the error screen keeps them unused.
                let backend = Arc::new(MemoryBackend::new());
                let auth: Arc<dyn AuthBackend> = backend.clone();
                let chat: Arc<dyn ChatBackend> = backend;
                let rt = tokio::runtime::Runtime::new().ok();
                match rt {
                    Some(rt) => (
                        Services { rt, auth, chat, demo: true },
                        Some(e.to_string()),
                    ),
                    None => {
                        log::error!("failed to start fallback runtime");
                        std::process::exit(1);
                    }
                }
            }
        };

        let mut app = Self {
            services,
            boot_error,
            current_screen: Screen::default(),
            email_input: String::new(),
            password_input: String::new(),
            name_input: String::new(),
            auth_error: None,
            auth_receiver: None,
            gate_receiver: None,
            user: None,
            view: None,
            dm_peer: None,
            view_receiver: None,
            pending_sends: Vec::new(),
            members_open: false,
            members: None,
            members_receiver: None,
            context_menu: ContextMenuState::default(),
            press: PressTracker::default(),
        };
        if app.boot_error.is_none() {
            app.start_session_guard();
        }
        app
    }

    /// Resolve the provider's current-user stream once at startup. Until it
    /// answers we render a loading placeholder, never the login form.
    fn start_session_guard(&mut self) {
        let auth = self.services.auth.clone();
        let (tx, rx) = mpsc::channel();
        self.services.rt.spawn(async move {
            let mut guard = SessionGuard::mount(auth.as_ref()).await;
            let _ = tx.send(guard.resolved().await);
        });
        self.gate_receiver = Some(rx);
    }

    fn poll_session_guard(&mut self) {
        if let Some(rx) = &self.gate_receiver {
            if let Ok(state) = rx.try_recv() {
                self.gate_receiver = None;
                match state {
                    GateState::Authenticated(user) => self.enter_chat(user),
                    GateState::Unauthenticated | GateState::Checking => {
                        self.current_screen = Screen::Login;
                    }
                }
            }
        }
    }

    fn enter_chat(&mut self, user: AuthUser) {
        self.user = Some(user);
        self.password_input.clear();
        self.current_screen = Screen::Chat;
        self.open_room();
    }

    fn start_sign_in(&mut self) {
        if self.auth_receiver.is_some() {
            return;
        }
        let auth = self.services.auth.clone();
        let email = self.email_input.trim().to_string();
        let password = self.password_input.clone();
        let (tx, rx) = mpsc::channel();
        self.services.rt.spawn(async move {
            let result = auth
                .sign_in(&email, &password)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.auth_receiver = Some(rx);
    }

    fn start_sign_up(&mut self) {
        if self.auth_receiver.is_some() {
            return;
        }
        let auth = self.services.auth.clone();
        let email = self.email_input.trim().to_string();
        let password = self.password_input.clone();
        let name = self.name_input.trim().to_string();
        let (tx, rx) = mpsc::channel();
        self.services.rt.spawn(async move {
            let result = auth
                .sign_up(&email, &password, &name)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.auth_receiver = Some(rx);
    }

    fn poll_auth(&mut self) {
        if let Some(rx) = &self.auth_receiver {
            if let Ok(result) = rx.try_recv() {
                self.auth_receiver = None;
                match result {
                    Ok(user) => {
                        self.upsert_profile(&user);
                        self.enter_chat(user);
                    }
                    Err(message) => self.auth_error = Some(message),
                }
            }
        }
    }

    /// Keep the roster document in step with the account. Write failures are
    /// logged; the session continues.
    fn upsert_profile(&self, user: &AuthUser) {
        let chat = self.services.chat.clone();
        let profile = UserProfile {
            uid: user.uid.clone(),
            name: user.sender_name().to_string(),
            photo_url: None,
            status: None,
        };
        self.services.rt.spawn(async move {
            if let Err(e) = chat.upsert_user(&profile).await {
                log::error!("failed to write roster profile: {}", e);
            }
        });
    }

    fn sign_out(&mut self) {
        let auth = self.services.auth.clone();
        self.services.rt.spawn(async move {
            auth.sign_out().await;
        });
        self.user = None;
        self.view = None;
        self.dm_peer = None;
        self.members = None;
        self.members_open = false;
        self.pending_sends.clear();
        self.context_menu.dismiss();
        log::debug!("navigate {}", Route::Login.path());
        self.current_screen = Screen::Login;
    }

    fn open_room(&mut self) {
        let Some(user) = self.user.clone() else { return };
        log::debug!("navigate {}", Route::Room.path());
        self.dm_peer = None;
        self.context_menu.dismiss();
        let chat = self.services.chat.clone();
        let (tx, rx) = mpsc::channel();
        self.services.rt.spawn(async move {
            let view = ChatView::open_room(chat.as_ref(), user).await;
            let _ = tx.send(Ok(view));
        });
        self.view_receiver = Some(rx);
    }

    fn open_private(&mut self, peer: UserProfile) {
        let Some(user) = self.user.clone() else { return };
        log::debug!("navigate {}", Route::PrivateChat(peer.uid.clone()).path());
        self.dm_peer = Some(peer.clone());
        self.members_open = false;
        self.members = None;
        self.context_menu.dismiss();
        let chat = self.services.chat.clone();
        let (tx, rx) = mpsc::channel();
        self.services.rt.spawn(async move {
            let result = ChatView::open_private(chat.as_ref(), user, &peer.uid)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.view_receiver = Some(rx);
    }

    fn poll_view_open(&mut self) {
        if let Some(rx) = &self.view_receiver {
            if let Ok(result) = rx.try_recv() {
                self.view_receiver = None;
                match result {
                    Ok(view) => self.view = Some(view),
                    Err(message) => {
                        log::error!("failed to open conversation: {}", message);
                        self.auth_error = Some(message);
                        self.dm_peer = None;
                    }
                }
            }
        }
    }

    /// Validate the compose input and fire the write. Compose state clears
    /// only when the acknowledgment comes back through `poll_sends`.
    fn start_send(&mut self) {
        let Some(view) = self.view.as_mut() else { return };
        let Some(draft) = view.prepare_send() else { return };
        let scope = view.scope().clone();
        let chat = self.services.chat.clone();
        let (tx, rx) = mpsc::channel();
        let task_scope = scope.clone();
        self.services.rt.spawn(async move {
            let _ = tx.send(chat.send_message(&task_scope, draft).await);
        });
        self.pending_sends.push((scope, rx));
    }

    fn poll_sends(&mut self) {
        let mut i = 0;
        while i < self.pending_sends.len() {
            match self.pending_sends[i].1.try_recv() {
                Ok(result) => {
                    let (scope, _) = self.pending_sends.remove(i);
                    match self.view.as_mut() {
                        Some(view) if view.scope() == &scope => {
                            view.complete_send(result);
                        }
                        _ => {
                            // The user left the view before the ack arrived.
                            if let Err(e) = result {
                                log::error!("send failed after leaving the view: {}", e);
                            }
                        }
                    }
                }
                Err(mpsc::TryRecvError::Empty) => i += 1,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.pending_sends.remove(i);
                }
            }
        }
    }

    fn toggle_members(&mut self) {
        if self.members_open {
            self.members_open = false;
            self.members = None;
            self.members_receiver = None;
            return;
        }
        let Some(user) = self.user.clone() else { return };
        self.members_open = true;
        let chat = self.services.chat.clone();
        let (tx, rx) = mpsc::channel();
        self.services.rt.spawn(async move {
            let result = MembersPanel::open(chat, &user).await.map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.members_receiver = Some(rx);
    }

    fn poll_members(&mut self) {
        if let Some(rx) = &self.members_receiver {
            if let Ok(result) = rx.try_recv() {
                self.members_receiver = None;
                match result {
                    Ok(panel) => self.members = Some(panel),
                    Err(message) => {
                        log::error!("failed to load members: {}", message);
                        self.members_open = false;
                    }
                }
            }
        }
        if let Some(panel) = self.members.as_mut() {
            panel.poll_counts();
        }
    }

    /// Dispatch the confirmed delete. Failures are logged only, matching the
    /// write-failure policy everywhere else.
    fn dispatch_delete(&mut self) {
        let Some(view) = self.view.as_mut() else { return };
        let Some(id) = view.take_delete_request() else { return };
        let scope = view.scope().clone();
        let chat = self.services.chat.clone();
        self.services.rt.spawn(async move {
            if let Err(e) = chat.mark_deleted(&scope, &id).await {
                log::error!("failed to delete message {}: {}", id, e);
            }
        });
    }

    // ---- UI ----------------------------------------------------------

    fn ui_loading(&self, ui: &mut egui::Ui, label: &str) {
        ui.vertical_centered(|ui| {
            ui.add_space(120.0);
            ui.spinner();
            ui.add_space(8.0);
            ui.label(label);
        });
    }

    fn ui_auth_screen(&mut self, ui: &mut egui::Ui) {
        let signup = self.current_screen == Screen::Signup;
        ui.vertical_centered(|ui| {
            ui.add_space(60.0);
            ui.heading("ChatVerse");
            ui.label(if signup {
                "Real-time chatting made simple"
            } else {
                "Welcome back to real-time conversation"
            });
            if self.services.demo {
                ui.add_space(4.0);
                ui.colored_label(
                    egui::Color32::KHAKI,
                    "demo mode — accounts live in memory only",
                );
            }
            ui.add_space(24.0);

            let field_width = 280.0;
            if signup {
                ui.add_sized(
                    [field_width, 24.0],
                    egui::TextEdit::singleline(&mut self.name_input).hint_text("Name"),
                );
                ui.add_space(8.0);
            }
            ui.add_sized(
                [field_width, 24.0],
                egui::TextEdit::singleline(&mut self.email_input).hint_text("Email"),
            );
            ui.add_space(8.0);
            let password_edit = ui.add_sized(
                [field_width, 24.0],
                egui::TextEdit::singleline(&mut self.password_input)
                    .hint_text("Password")
                    .password(true),
            );
            ui.add_space(16.0);

            let busy = self.auth_receiver.is_some();
            let submit_label = if signup { "Signup" } else { "Login" };
            let submitted = ui
                .add_enabled(!busy, egui::Button::new(submit_label))
                .clicked()
                || (password_edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)));
            if submitted && !busy {
                if signup {
                    self.start_sign_up();
                } else {
                    self.start_sign_in();
                }
            }
            if busy {
                ui.add_space(8.0);
                ui.spinner();
            }

            ui.add_space(16.0);
            if signup {
                ui.horizontal(|ui| {
                    ui.label("Already have an account?");
                    if ui.link("Go to Login").clicked() {
                        self.current_screen = Screen::Login;
                    }
                });
            } else {
                ui.horizontal(|ui| {
                    ui.label("Don't have an account?");
                    if ui.link("Go to Signup").clicked() {
                        self.current_screen = Screen::Signup;
                    }
                });
            }
        });
    }

    fn ui_chat_header(&mut self, ui: &mut egui::Ui) {
        let peer_name = self.dm_peer.as_ref().map(|p| p.name.clone());
        ui.horizontal(|ui| {
            match peer_name {
                Some(name) => {
                    ui.heading(name);
                    if ui.button("⬅ Go Back").clicked() {
                        self.open_room();
                    }
                }
                None => {
                    ui.heading("Chat Room");
                    if ui.button("Members").clicked() {
                        self.toggle_members();
                    }
                }
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Logout").clicked() {
                    self.sign_out();
                }
                if let Some(user) = &self.user {
                    ui.label(
                        egui::RichText::new(user.sender_name())
                            .color(egui::Color32::GRAY),
                    );
                }
            });
        });
    }

    fn ui_compose(&mut self, ui: &mut egui::Ui) {
        let mut send_clicked = false;
        let mut dismiss_reply = false;

        if let Some(view) = self.view.as_ref() {
            if let Some(reply) = view.staged_reply() {
                ui.horizontal(|ui| {
                    ui.label(
                        egui::RichText::new(format!("↪ {}: {}", reply.sender_name, reply.text))
                            .italics()
                            .color(egui::Color32::GRAY),
                    );
                    if ui.small_button("✕").clicked() {
                        dismiss_reply = true;
                    }
                });
            }
            if let Some(err) = view.last_error() {
                ui.colored_label(
                    egui::Color32::RED,
                    format!("send failed: {} — your message was kept", err),
                );
            }
        }

        let mut submitted = false;
        ui.horizontal(|ui| {
            let width = ui.available_width() - 70.0;
            if let Some(view) = self.view.as_mut() {
                let edit = ui.add_sized(
                    [width, 28.0],
                    egui::TextEdit::singleline(view.compose_mut())
                        .hint_text("Type your message..."),
                );
                submitted = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if submitted {
                    edit.request_focus();
                }
            }
            if ui.button("Send").clicked() {
                send_clicked = true;
            }
        });

        if dismiss_reply {
            if let Some(view) = self.view.as_mut() {
                view.clear_reply();
            }
        }
        if send_clicked || submitted {
            self.start_send();
        }
    }

    fn ui_messages(&mut self, ui: &mut egui::Ui) {
        let today = chrono::Local::now().date_naive();
        let rows = match self.view.as_ref() {
            Some(view) => view.rows(today, grouping::local_day),
            None => {
                self.ui_loading(ui, "Loading...");
                return;
            }
        };

        let mut open_menu: Option<(MessageId, (f32, f32))> = None;
        let mut menu_dismiss = false;
        let viewport = ui.ctx().screen_rect();

        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for row in &rows {
                    if let Some(ref label) = row.separator {
                        ui.vertical_centered(|ui| {
                            ui.add_space(6.0);
                            ui.label(
                                egui::RichText::new(label.to_string())
                                    .size(11.0)
                                    .color(egui::Color32::GRAY),
                            );
                            ui.add_space(6.0);
                        });
                    }

                    let align = if row.outgoing {
                        egui::Align::Max
                    } else {
                        egui::Align::Min
                    };
                    ui.with_layout(egui::Layout::top_down(align), |ui| {
                        let fill = if row.outgoing {
                            egui::Color32::from_rgb(38, 60, 96)
                        } else {
                            ui.visuals().faint_bg_color
                        };
                        let frame = egui::Frame::none()
                            .fill(fill)
                            .rounding(egui::Rounding::same(8.0))
                            .inner_margin(egui::Margin::same(8.0));
                        let response = frame
                            .show(ui, |ui| {
                                ui.set_max_width(BUBBLE_MAX_WIDTH);
                                if let Some(ref reply) = row.message.reply_to {
                                    ui.label(
                                        egui::RichText::new(format!(
                                            "↪ {}: {}",
                                            reply.sender_name, reply.text
                                        ))
                                        .size(11.0)
                                        .italics()
                                        .color(egui::Color32::GRAY),
                                    );
                                }
                                if row.message.deleted {
                                    ui.label(
                                        egui::RichText::new(&row.body)
                                            .italics()
                                            .color(egui::Color32::GRAY),
                                    );
                                } else {
                                    ui.label(&row.body);
                                }
                                let time = row
                                    .message
                                    .created_at
                                    .map(format_time)
                                    .unwrap_or_else(|| "sending...".to_string());
                                ui.label(
                                    egui::RichText::new(format!(
                                        "{} • {}",
                                        row.message.sender_name, time
                                    ))
                                    .size(10.0)
                                    .color(egui::Color32::DARK_GRAY),
                                );
                            })
                            .response;

                        // Context menu triggers: secondary click, or a press
                        // held past the long-press threshold. Deleted
                        // messages have no menu.
                        if !row.message.deleted {
                            let response = response.interact(egui::Sense::click_and_drag());
                            let pointer = ui.input(|i| i.pointer.interact_pos());
                            if response.secondary_clicked() {
                                if let Some(pos) = pointer {
                                    open_menu = Some((row.message.id.clone(), (pos.x, pos.y)));
                                }
                            }
                            if response.is_pointer_button_down_on() {
                                if let Some(pos) = pointer {
                                    self.press.press(
                                        row.message.id.clone(),
                                        Instant::now(),
                                        (pos.x, pos.y),
                                    );
                                }
                            } else if self.press.is_pressing(&row.message.id) {
                                if let Some(opened) = self.press.release(Instant::now()) {
                                    open_menu = Some(opened);
                                }
                            }
                        }
                    });
                    ui.add_space(4.0);
                }
            });

        // Scrolling the list dismisses the menu.
        if self.context_menu.is_open() && ui.input(|i| i.scroll_delta.y.abs() > 0.0) {
            menu_dismiss = true;
        }

        if let Some((id, (x, y))) = open_menu {
            self.context_menu.open_at(
                id,
                x,
                y,
                MESSAGE_MENU_ITEMS,
                (viewport.width(), viewport.height()),
            );
        }
        if menu_dismiss {
            self.context_menu.dismiss();
        }
    }

    /// The floating Reply/Delete menu, clamped inside the viewport.
    fn ui_context_menu(&mut self, ctx: &egui::Context) {
        if !self.context_menu.is_open() {
            return;
        }
        let viewer_uid = self.user.as_ref().map(|u| u.uid.clone()).unwrap_or_default();
        let Some((x, y)) = self.context_menu.position() else { return };
        let Some(target_id) = self.context_menu.target().cloned() else { return };
        let target = self
            .view
            .as_ref()
            .and_then(|v| v.messages().into_iter().find(|m| m.id == target_id));
        let Some(target) = target else {
            self.context_menu.dismiss();
            return;
        };

        let mut selected = false;
        let area = egui::Area::new(egui::Id::new("message_context_menu"))
            .order(egui::Order::Foreground)
            .fixed_pos(egui::pos2(x, y))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.set_width(menu::MENU_WIDTH - 16.0);
                    if ui.button("Reply").clicked() {
                        if let Some(view) = self.view.as_mut() {
                            view.stage_reply(&target);
                        }
                        selected = true;
                    }
                    if target.sender_id == viewer_uid && ui.button("Delete").clicked() {
                        if let Some(view) = self.view.as_mut() {
                            view.request_delete(&target.id);
                        }
                        selected = true;
                    }
                });
            });

        let clicked_outside = ctx.input(|i| i.pointer.any_pressed())
            && ctx
                .input(|i| i.pointer.interact_pos())
                .map(|pos| !area.response.rect.contains(pos))
                .unwrap_or(false);
        if selected || clicked_outside {
            self.context_menu.dismiss();
        }
    }

    /// Modal confirmation before a soft delete goes out.
    fn ui_delete_confirm(&mut self, ctx: &egui::Context) {
        let Some(pending) = self.view.as_ref().and_then(|v| v.pending_delete()) else {
            return;
        };
        let mut confirm = false;
        let mut cancel = false;
        egui::Window::new("Delete message")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(format!("Delete \"{}\"?", pending.text));
                ui.label(
                    egui::RichText::new("Everyone keeps seeing a placeholder in its place.")
                        .size(11.0)
                        .color(egui::Color32::GRAY),
                );
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        confirm = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancel = true;
                    }
                });
            });
        if confirm {
            self.dispatch_delete();
        } else if cancel {
            if let Some(view) = self.view.as_mut() {
                view.cancel_delete();
            }
        }
    }

    /// Blocking dialog for auth-provider rejections, shown verbatim.
    fn ui_auth_error(&mut self, ctx: &egui::Context) {
        let Some(message) = self.auth_error.clone() else { return };
        let mut dismiss = false;
        egui::Window::new("Error")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    dismiss = true;
                }
            });
        if dismiss {
            self.auth_error = None;
        }
    }

    fn ui_members_panel(&mut self, ctx: &egui::Context) {
        if !self.members_open {
            return;
        }
        let mut start_dm: Option<UserProfile> = None;
        let mut close = false;
        let viewer_uid = self.user.as_ref().map(|u| u.uid.clone()).unwrap_or_default();

        egui::SidePanel::right("members_panel")
            .resizable(false)
            .default_width(260.0)
            .show(ctx, |ui| {
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    match self.members.as_ref() {
                        Some(panel) => ui.heading(format!("Members ({})", panel.members().len())),
                        None => ui.heading("Members"),
                    };
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("✕").clicked() {
                            close = true;
                        }
                    });
                });
                ui.add_space(4.0);

                let Some(panel) = self.members.as_mut() else {
                    ui.spinner();
                    ui.label("Loading...");
                    return;
                };
                ui.add(
                    egui::TextEdit::singleline(panel.search_mut()).hint_text("Search members"),
                );
                ui.separator();

                egui::ScrollArea::vertical().auto_shrink([false; 2]).show(ui, |ui| {
                    for member in panel.visible() {
                        let is_self = member.uid == viewer_uid;
                        let unread = panel.unread(&member.uid);
                        let name = if is_self {
                            "You".to_string()
                        } else {
                            member.name.clone()
                        };
                        ui.horizontal(|ui| {
                            let row = ui.selectable_label(
                                false,
                                format!("{}\n{}", name, member.display_status()),
                            );
                            if unread > 0 {
                                ui.label(
                                    egui::RichText::new(format!("{}", unread))
                                        .color(egui::Color32::WHITE)
                                        .background_color(egui::Color32::from_rgb(200, 40, 40)),
                                );
                            }
                            if row.clicked() && !is_self {
                                start_dm = Some(member.clone());
                            }
                        });
                    }
                });
            });

        if close {
            self.members_open = false;
            self.members = None;
        }
        if let Some(peer) = start_dm {
            self.open_private(peer);
        }
    }
}

fn format_time(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.with_timezone(&chrono::Local).format("%-I:%M %p").to_string()
}

impl eframe::App for ChatVerseApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Live queries push in the background; keep frames coming so their
        // snapshots appear without user input.
        ctx.request_repaint_after(Duration::from_millis(200));

        if let Some(err) = self.boot_error.clone() {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    ui.add_space(120.0);
                    ui.heading("ChatVerse could not start");
                    ui.colored_label(egui::Color32::RED, err);
                    ui.label("Fix ~/.chatverse/config.json and restart.");
                });
            });
            return;
        }

        self.poll_session_guard();
        self.poll_auth();
        self.poll_view_open();
        self.poll_sends();
        self.poll_members();

        self.ui_auth_error(ctx);

        if self.gate_receiver.is_some() {
            egui::CentralPanel::default().show(ctx, |ui| {
                self.ui_loading(ui, "Loading...");
            });
            return;
        }

        match self.current_screen {
            Screen::Login | Screen::Signup => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    self.ui_auth_screen(ui);
                });
            }
            Screen::Chat => {
                self.ui_members_panel(ctx);
                egui::TopBottomPanel::top("chat_header").show(ctx, |ui| {
                    ui.add_space(6.0);
                    self.ui_chat_header(ui);
                    ui.add_space(6.0);
                });
                egui::TopBottomPanel::bottom("chat_compose").show(ctx, |ui| {
                    ui.add_space(6.0);
                    self.ui_compose(ui);
                    ui.add_space(6.0);
                });
                egui::CentralPanel::default().show(ctx, |ui| {
                    self.ui_messages(ui);
                });
                self.ui_context_menu(ctx);
                self.ui_delete_confirm(ctx);
            }
        }
    }
}
