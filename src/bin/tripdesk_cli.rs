//!
//! tripdesk CLI binary
//! -------------------
//! Interactive terminal client for the tripdesk dashboards. Signs in against
//! the hosted auth service, keeps the process-wide session, and renders each
//! page through its access guard so navigation behaves like the web client.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use tripdesk::access::route::{self, post_sign_in_path, return_target, RESET_PASSWORD_PATH};
use tripdesk::access::{AccessGuard, Rendered, ROUTES, SIGN_IN_PATH};
use tripdesk::config::AppConfig;
use tripdesk::identity::{Credentials, HostedAuthClient, SessionProvider, SessionStore};
use tripdesk::nav::{MemoryNavigator, Navigator, Redirector};

// Upper bound on guard redirects followed in one render pass.
const MAX_HOPS: usize = 4;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--auth-url <url>] [--anon-key <key>] [--token-file <path>] [--start-path <path>] [--timeout <secs>] [--reset-redirect <url>]\n\nFlags:\n  --auth-url <url>         Hosted auth base URL (env: TRIPDESK_AUTH_URL, default http://127.0.0.1:54321)\n  --anon-key <key>         Public API key sent as 'apikey' (env: TRIPDESK_ANON_KEY)\n  --token-file <path>      Persist the session tokens here (env: TRIPDESK_TOKEN_FILE; default: memory only)\n  --start-path <path>      First page to open (env: TRIPDESK_START_PATH, default /)\n  --timeout <secs>         HTTP timeout for auth calls (env: TRIPDESK_HTTP_TIMEOUT, default 15)\n  --reset-redirect <url>   Link target for password reset emails (env: TRIPDESK_RESET_REDIRECT)\n  -h, --help               Show this help\n\nInteractive commands:\n  login <email> <password>   sign in\n  logout                     sign out\n  reset <email>              send a password reset email\n  refresh | focus            re-validate the session (as on window focus)\n  go <path>                  open a page, e.g. go /operator/packages\n  back                       previous page\n  whoami                     show the signed-in user\n  status                     show session state and location\n  routes                     list pages and the roles allowed on them\n  clear                      dismiss the last auth error\n  help                       show this help\n  quit | exit                leave"
    );
}

struct Host {
    store: Arc<SessionStore>,
    nav: Arc<MemoryNavigator>,
    redirector: Arc<Redirector>,
    // guard of the protected route currently shown, kept across renders so its latch holds
    guard: Option<(&'static str, AccessGuard)>,
}

impl Host {
    fn render(&mut self) {
        for _ in 0..MAX_HOPS {
            let loc = self.nav.current_path();
            let Some(page) = route::lookup(&loc) else {
                println!("404: no page at {}", loc);
                self.guard = None;
                return;
            };
            let Some(requirement) = page.requirement else {
                self.guard = None;
                self.render_public(page.title, &loc);
                return;
            };
            let keep = matches!(&self.guard, Some((prefix, _)) if *prefix == page.prefix);
            if !keep {
                self.guard = Some((page.prefix, AccessGuard::new(requirement, self.redirector.clone())));
            }
            let snap = self.store.snapshot();
            let Some((_, guard)) = self.guard.as_mut() else { return; };
            match guard.render(&snap, &loc, || page.title) {
                Rendered::Content(title) => {
                    let who = snap.user.as_ref().map(|u| format!("{} ({})", u.name, u.role)).unwrap_or_default();
                    println!("[{}] {}  signed in as {}", title, loc, who);
                    return;
                }
                Rendered::Loading => {
                    println!("loading...");
                    return;
                }
                Rendered::Redirecting(target) => {
                    println!("-> {}", target);
                    if self.redirector.commit() == 0 { return; }
                }
            }
        }
        tracing::warn!(target: "tripdesk::nav", "stopped following redirects after {} hops", MAX_HOPS);
    }

    fn render_public(&self, title: &str, loc: &str) {
        println!("[{}] {}", title, loc);
        let snap = self.store.snapshot();
        if let Some(err) = snap.error.as_ref() {
            // auth errors show on the form that caused them
            if route::path_of(loc) == SIGN_IN_PATH || route::path_of(loc) == RESET_PASSWORD_PATH {
                println!("  ! {}", err.message());
            }
        }
        if route::path_of(loc) == SIGN_IN_PATH {
            if let Some(t) = return_target(loc) {
                println!("  (you will return to {} after signing in)", t);
            }
        }
    }

    fn status(&self) {
        let snap = self.store.snapshot();
        println!("location: {}", self.nav.current_path());
        println!("loading:  {}", snap.is_loading);
        match snap.user.as_ref() {
            Some(u) => println!("user:     {} <{}> {}", u.name, u.email().unwrap_or("-"), u.role),
            None => println!("user:     (signed out)"),
        }
        if let Some(e) = snap.error.as_ref() {
            println!("error:    {}", e);
        }
        println!("history:  {} entries", self.nav.history().len());
    }

    async fn dispatch(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or("").to_ascii_lowercase();
        let rest: Vec<&str> = parts.collect();
        match cmd.as_str() {
            "quit" | "exit" => return false,
            "help" => print_usage("tripdesk_cli"),
            "login" => {
                if rest.len() != 2 { println!("usage: login <email> <password>"); return true; }
                self.store.clear_error();
                match self.store.sign_in(&Credentials::new(rest[0], rest[1])).await {
                    Ok(user) => {
                        println!("signed in as {} ({})", user.name, user.role);
                        let loc = self.nav.current_path();
                        let on_public = route::lookup(&loc).map(|r| r.requirement.is_none()).unwrap_or(true);
                        if on_public {
                            self.nav.navigate(&post_sign_in_path(user.role, &loc));
                        }
                    }
                    Err(e) if e.is_superseded() => {}
                    Err(_) => {
                        if route::path_of(&self.nav.current_path()) != SIGN_IN_PATH {
                            self.nav.navigate(SIGN_IN_PATH);
                        }
                    }
                }
            }
            "logout" => {
                match self.store.sign_out().await {
                    Ok(()) => println!("signed out"),
                    Err(e) if e.is_superseded() => {}
                    Err(e) => println!("signed out locally; revocation failed: {}", e.message()),
                }
            }
            "reset" => {
                let Some(email) = rest.first() else { println!("usage: reset <email>"); return true; };
                self.store.clear_error();
                if route::path_of(&self.nav.current_path()) != RESET_PASSWORD_PATH {
                    self.nav.navigate(RESET_PASSWORD_PATH);
                }
                if self.store.reset_password(email).await.is_ok() {
                    println!("if {} has an account, a reset link is on its way", email);
                }
            }
            "refresh" | "focus" => {
                match self.store.refresh_session().await {
                    Ok(Some(u)) => println!("session valid for {}", u.name),
                    Ok(None) => println!("no session"),
                    Err(e) if e.is_superseded() => {}
                    Err(e) => println!("session check failed: {}", e.message()),
                }
            }
            "go" => {
                let Some(p) = rest.first() else { println!("usage: go <path>"); return true; };
                let path = if p.starts_with('/') { p.to_string() } else { format!("/{}", p) };
                self.nav.navigate(&path);
            }
            "back" => {
                if self.nav.back().is_none() { println!("no previous page"); }
            }
            "whoami" => {
                match self.store.snapshot().user {
                    Some(u) => println!("{} {} {}", u.id, u.name, u.role),
                    None => println!("(signed out)"),
                }
                return true;
            }
            "status" => { self.status(); return true; }
            "routes" => {
                for r in ROUTES {
                    let who = match r.requirement {
                        None => "public".to_string(),
                        Some(req) if req.is_any_authenticated() => "any signed-in user".to_string(),
                        Some(req) => req.roles().iter().map(|x| x.to_string()).collect::<Vec<_>>().join(", "),
                    };
                    println!("{:<22} {:<26} {}", r.prefix, r.title, who);
                }
                return true;
            }
            "clear" => self.store.clear_error(),
            other => {
                println!("unknown command '{}'; type 'help'", other);
                return true;
            }
        }
        self.render();
        true
    }
}

async fn run(cfg: AppConfig) -> Result<()> {
    let client = HostedAuthClient::from_config(&cfg).context("failed to set up auth client")?;
    tracing::info!(target: "tripdesk", "auth service at {}, start page {}", cfg.auth_url, cfg.start_path);

    let (store, init) = SessionProvider::start(Arc::new(client));
    let nav = Arc::new(MemoryNavigator::new(&cfg.start_path));
    let redirector = Arc::new(Redirector::new(nav.clone()));
    let mut host = Host { store, nav, redirector, guard: None };

    host.render();
    match init.await.context("session task failed")? {
        Ok(_) => {}
        Err(e) if e.is_superseded() => {}
        Err(e) => println!("could not restore session: {}", e.message()),
    }
    host.render();

    let mut rl = DefaultEditor::new().context("failed to initialise line editor")?;
    loop {
        match rl.readline("tripdesk> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() { continue; }
                remember(line, |l| rl.add_history_entry(l));
                if !host.dispatch(line).await { break; }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    SessionProvider::teardown();
    Ok(())
}

/// Add `line` to the editor history unless it carries a password. Returns
/// whether it was recorded.
fn remember<E: std::fmt::Display>(line: &str, add: impl FnOnce(&str) -> Result<bool, E>) -> bool {
    if line.to_ascii_lowercase().starts_with("login ") {
        return false;
    }
    match add(line) {
        Ok(added) => added,
        Err(e) => {
            tracing::debug!(target: "tripdesk::cli", "history entry not recorded: {}", e);
            false
        }
    }
}

/// Entry point: parse flags, set up logging and a single-threaded runtime,
/// then hand over to the interactive loop.
fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage(&program);
        return Ok(());
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cfg = match AppConfig::load(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            print_usage(&program);
            std::process::exit(2);
        }
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;
    rt.block_on(run(cfg))
}
