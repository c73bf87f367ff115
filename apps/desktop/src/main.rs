use std::sync::Arc;

mod config;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use client_core::{
    Alert, AlertKind, AuthClient, ConfirmPrompt, DurableSessionVault, MemorySessionVault, Page,
    SessionEvent, SessionVault, ViewModel,
};
use shared::{
    domain::{Role, UserId},
    protocol::{LoginRequest, RegisterRequest},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, mpsc, oneshot, Mutex},
};
use tracing::warn;
use url::Url;

#[derive(Parser, Debug)]
struct Args {
    /// Base URL of the authentication API.
    #[arg(long)]
    api_url: Option<String>,
    /// Sqlite file holding the persisted session.
    #[arg(long)]
    database_url: Option<String>,
    /// Keep the session in memory only; nothing survives exit.
    #[arg(long)]
    no_persist: bool,
}

/// Routes stdin lines either to a pending confirmation prompt or to the
/// command loop. Only one task ever reads stdin.
struct LineRouter {
    pending_confirm: Mutex<Option<oneshot::Sender<String>>>,
    command_tx: mpsc::Sender<String>,
}

impl LineRouter {
    fn new(command_tx: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self {
            pending_confirm: Mutex::new(None),
            command_tx,
        })
    }

    async fn route(&self, line: String) {
        if let Some(tx) = self.pending_confirm.lock().await.take() {
            let _ = tx.send(line);
            return;
        }
        let _ = self.command_tx.send(line).await;
    }
}

fn spawn_stdin_reader(router: Arc<LineRouter>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            router.route(line).await;
        }
    });
}

struct TerminalConfirm {
    router: Arc<LineRouter>,
}

#[async_trait]
impl ConfirmPrompt for TerminalConfirm {
    async fn confirm(&self, message: &str) -> bool {
        println!("{message} [y/N]");
        let (tx, rx) = oneshot::channel();
        *self.router.pending_confirm.lock().await = Some(tx);
        match rx.await {
            Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Help,
    Show,
    Navigate(Page),
    Register {
        username: String,
        email: String,
        password: String,
        role: Role,
    },
    Login {
        username: String,
        password: String,
    },
    Logout,
    RefreshUsers,
    SetRole {
        user_id: i64,
        role: Role,
    },
    Quit,
}

fn parse_page(name: &str) -> Option<Page> {
    match name {
        "index" => Some(Page::Index),
        "login" => Some(Page::Login),
        "register" => Some(Page::Register),
        "dashboard" => Some(Page::Dashboard),
        "admin" => Some(Page::Admin),
        _ => None,
    }
}

fn page_name(page: Page) -> &'static str {
    match page {
        Page::Index => "index",
        Page::Login => "login",
        Page::Register => "register",
        Page::Dashboard => "dashboard",
        Page::Admin => "admin",
    }
}

fn parse_role(name: &str) -> Option<Role> {
    match name {
        "admin" => Some(Role::Admin),
        "user" => Some(Role::User),
        _ => None,
    }
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(keyword) = parts.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = parts.collect();

    match (keyword, args.as_slice()) {
        ("help", []) => Ok(Command::Help),
        ("show", []) => Ok(Command::Show),
        ("quit" | "exit", []) => Ok(Command::Quit),
        ("page", [name]) => parse_page(name)
            .map(Command::Navigate)
            .ok_or_else(|| format!("unknown page '{name}'")),
        ("register", [username, email, password]) => Ok(Command::Register {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: Role::User,
        }),
        ("register", [username, email, password, role]) => parse_role(role)
            .map(|role| Command::Register {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
                role,
            })
            .ok_or_else(|| format!("unknown role '{role}'")),
        ("login", [username, password]) => Ok(Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        }),
        ("logout", []) => Ok(Command::Logout),
        ("users", []) => Ok(Command::RefreshUsers),
        ("role", [user_id, role]) => {
            let user_id = user_id
                .parse::<i64>()
                .map_err(|_| format!("invalid user id '{user_id}'"))?;
            let role = parse_role(role).ok_or_else(|| format!("unknown role '{role}'"))?;
            Ok(Command::SetRole { user_id, role })
        }
        _ => Err(format!("unrecognized command '{line}'; try 'help'")),
    }
}

fn print_help() {
    println!("commands:");
    println!("  page <index|login|register|dashboard|admin>");
    println!("  register <username> <email> <password> [admin|user]");
    println!("  login <username> <password>");
    println!("  logout");
    println!("  users                 refresh the user list (admin)");
    println!("  role <id> <admin|user>  change a user's role (admin)");
    println!("  show | help | quit");
}

fn print_alert(alert: &Alert) {
    let tag = match alert.kind {
        AlertKind::Success => "ok",
        AlertKind::Error => "error",
        AlertKind::Info => "info",
    };
    println!("[{tag}] {}", alert.message);
}

fn print_view(page: Page, view: &ViewModel) {
    println!();
    println!("== {} ==", page_name(page));
    if view.anonymous_visible {
        println!("nav: index | login | register");
    }
    if view.authenticated_visible {
        let admin = if view.admin_section_visible {
            " | admin"
        } else {
            ""
        };
        println!("nav: index | dashboard{admin} | logout");
    }
    if let Some(info) = &view.user_info {
        println!(
            "signed in: {} <{}> [{}]",
            info.username,
            info.email,
            info.role.as_str()
        );
    }
    if view.admin_section_visible && !view.user_rows.is_empty() {
        println!("users:");
        for row in &view.user_rows {
            let created = row
                .created_at
                .map(|at| at.date_naive().to_string())
                .unwrap_or_else(|| "-".to_string());
            let action = row
                .role_toggle
                .map(|role| format!("  (role {} {})", row.id, role.as_str()))
                .unwrap_or_default();
            println!(
                "  #{} {} <{}> [{}] since {}{}",
                row.id,
                row.username,
                row.email,
                row.role.as_str(),
                created,
                action
            );
        }
    }
}

struct App {
    client: Arc<AuthClient>,
    page: Page,
}

impl App {
    async fn render(&self) {
        let view = self.client.render().await;
        print_view(self.page, &view);
    }

    async fn enter_page(&mut self, page: Page) {
        self.page = page;
        self.client.init_page(page).await;
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SessionChanged | SessionEvent::UserListUpdated => self.render().await,
            SessionEvent::AlertRaised(alert) => print_alert(&alert),
            SessionEvent::AlertCleared => {}
            SessionEvent::NavigationRequested(page) => {
                println!("-> {}", page_name(page));
                self.enter_page(page).await;
            }
        }
    }

    /// Typed command dispatch; every handler is bound here at startup rather
    /// than looked up by name at click time.
    async fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::Help => print_help(),
            Command::Show => self.render().await,
            Command::Navigate(page) => self.enter_page(page).await,
            Command::Register {
                username,
                email,
                password,
                role,
            } => {
                self.client
                    .register(RegisterRequest {
                        username,
                        email,
                        password,
                        role,
                    })
                    .await
            }
            Command::Login { username, password } => {
                self.client
                    .login(LoginRequest { username, password })
                    .await
            }
            Command::Logout => self.client.logout().await,
            Command::RefreshUsers => self.client.load_users().await,
            Command::SetRole { user_id, role } => {
                self.client.update_role(UserId(user_id), role).await
            }
            Command::Quit => return false,
        }
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut settings = config::load_settings();
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = Some(database_url);
    }
    if args.no_persist {
        settings.database_url = None;
    }

    let base_url = Url::parse(&settings.api_base_url)
        .with_context(|| format!("invalid api base url '{}'", settings.api_base_url))?;

    let vault: Arc<dyn SessionVault> = match &settings.database_url {
        Some(raw) => {
            let database_url = config::prepare_database_url(raw)?;
            DurableSessionVault::initialize(&database_url).await?
        }
        None => Arc::new(MemorySessionVault::default()),
    };

    let (command_tx, mut command_rx) = mpsc::channel(16);
    let router = LineRouter::new(command_tx);
    spawn_stdin_reader(Arc::clone(&router));

    let client = AuthClient::new_with_dependencies(
        base_url,
        vault,
        Arc::new(TerminalConfirm {
            router: Arc::clone(&router),
        }),
    );
    let mut events = client.subscribe_events();

    client.restore_session().await;

    let mut app = App {
        client: Arc::clone(&client),
        page: Page::Index,
    };
    print_help();
    app.enter_page(Page::Index).await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => app.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("ui: dropped {skipped} session events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = command_rx.recv() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    app.render().await;
                    continue;
                }
                match parse_command(line.trim()) {
                    Ok(command) => {
                        if !app.dispatch(command).await {
                            break;
                        }
                    }
                    Err(message) => println!("[error] {message}"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_login_command() {
        assert_eq!(
            parse_command("login alice secret"),
            Ok(Command::Login {
                username: "alice".to_string(),
                password: "secret".to_string(),
            })
        );
    }

    #[test]
    fn parses_role_command_with_valid_role() {
        assert_eq!(
            parse_command("role 3 admin"),
            Ok(Command::SetRole {
                user_id: 3,
                role: Role::Admin,
            })
        );
        assert!(parse_command("role 3 owner").is_err());
        assert!(parse_command("role three admin").is_err());
    }

    #[test]
    fn register_defaults_to_the_user_role() {
        let command = parse_command("register bob bob@example.com secret").expect("parse");
        match command {
            Command::Register { role, .. } => assert_eq!(role, Role::User),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_pages_and_commands() {
        assert!(parse_command("page settings").is_err());
        assert!(parse_command("frobnicate").is_err());
    }
}
