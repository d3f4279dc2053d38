use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;

use svastha_onboard::config::OnboardingConfig;
use svastha_onboard::identity::LocalIdentityProvider;
use svastha_onboard::onboarding::{
    Destination, OnboardingEvent, OnboardingManager, OnboardingRouteState, RouteDecision,
    onboarding_routes,
};
use svastha_onboard::store::LibSqlBackend;

/// Line-oriented stdin prompt.
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Ask for one line. `None` on EOF.
    async fn ask(&mut self, label: &str) -> anyhow::Result<Option<String>> {
        eprint!("{label}: ");
        let line = self.lines.next_line().await.context("reading stdin")?;
        Ok(line.map(|l| l.trim().to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env()?;

    eprintln!("🌿 Svastha onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   Status API: http://0.0.0.0:{}/api/onboarding/status\n",
        config.http_port
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let backend = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    let identity = Arc::new(LocalIdentityProvider::with_accounts(backend.clone()));
    let manager = Arc::new(OnboardingManager::new(
        backend.clone(),
        identity,
        backend,
        &config,
    ));

    // ── Status API ───────────────────────────────────────────────────────
    let app = onboarding_routes(OnboardingRouteState {
        manager: Arc::clone(&manager),
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("binding port {}", config.http_port))?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    // ── Notices ──────────────────────────────────────────────────────────
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(OnboardingEvent::Notice { message }) => eprintln!("⚠️  {message}"),
                Ok(OnboardingEvent::PhaseChanged { from, to }) => {
                    tracing::debug!(%from, %to, "Phase changed");
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut prompt = Prompt::new();
    let destination = match manager.start_destination().await? {
        Destination::Welcome => match welcome(&manager, &mut prompt).await? {
            Some(destination) => destination,
            None => return Ok(()),
        },
        other => other,
    };

    if destination == Destination::Survey && !survey(&manager, &mut prompt).await? {
        return Ok(());
    }

    eprintln!("\n✅ You're all set. Welcome to Svastha!");
    Ok(())
}

/// Username entry and authentication. `None` if stdin closed.
async fn welcome(
    manager: &OnboardingManager,
    prompt: &mut Prompt,
) -> anyhow::Result<Option<Destination>> {
    loop {
        let Some(username) = prompt.ask("Username (or 'guest')").await? else {
            return Ok(None);
        };
        if username.is_empty() {
            continue;
        }

        let result = if username.eq_ignore_ascii_case("guest") {
            manager.continue_as_guest().await
        } else {
            let decision = manager.begin(&username).await.inspect(|decision| {
                let screen = Destination::for_decision(*decision, &username);
                tracing::debug!(route = %screen.route(), "Username routed");
            });
            match decision {
                Ok(RouteDecision::ToSignIn) => {
                    let Some(password) = prompt.ask("Password").await? else {
                        return Ok(None);
                    };
                    manager
                        .sign_in_with_password(&username, &SecretString::from(password))
                        .await
                }
                Ok(RouteDecision::ToSignUp) => {
                    eprintln!("Looks like you're new here, {username}.");
                    let Some(email) = prompt.ask("Email").await? else {
                        return Ok(None);
                    };
                    let Some(password) = prompt.ask("Choose a password").await? else {
                        return Ok(None);
                    };
                    manager
                        .register(&username, &email, &SecretString::from(password))
                        .await
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(destination) => return Ok(Some(destination)),
            // Recovered errors were already shown as notices.
            Err(e) => tracing::debug!(error = %e, "Authentication attempt failed"),
        }
    }
}

/// Collect and submit the survey. `false` if stdin closed.
async fn survey(manager: &OnboardingManager, prompt: &mut Prompt) -> anyhow::Result<bool> {
    eprintln!("\nAbout you");

    let Some(gender) = prompt.ask("Gender [0] male [1] female").await? else {
        return Ok(false);
    };
    manager.update_gender(gender.parse().unwrap_or(0)).await;

    for (label, field) in [("Age", 0), ("Height (cm)", 1), ("Weight (kg)", 2)] {
        let value = loop {
            match prompt.ask(label).await? {
                None => return Ok(false),
                Some(v) if v.is_empty() => eprintln!("   {label} is required"),
                Some(v) => break v,
            }
        };
        match field {
            0 => manager.update_age(&value).await,
            1 => manager.update_height(&value).await,
            _ => manager.update_weight(&value).await,
        }
    }

    let Some(lifestyle) = prompt
        .ask("Lifestyle [0] sedentary [1] moderate [2] active")
        .await?
    else {
        return Ok(false);
    };
    manager.update_lifestyle(lifestyle.parse().unwrap_or(0)).await;

    let Some(conditions) = prompt.ask("Conditions (comma separated, blank for none)").await?
    else {
        return Ok(false);
    };
    for condition in conditions.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        manager.toggle_condition(condition).await;
    }

    if manager.requires_period_date().await {
        let label = format!("{} (YYYY-MM-DD)", manager.period_date_label().await);
        if let Some(date) = prompt.ask(&label).await? {
            match NaiveDate::parse_from_str(&date, "%Y-%m-%d") {
                Ok(date) => {
                    if let Some(start) = date.and_hms_opt(0, 0, 0) {
                        manager
                            .set_period_date(start.and_utc().timestamp_millis())
                            .await;
                    }
                }
                Err(_) => eprintln!("   Skipping unreadable date {date:?}"),
            }
        }
    }

    loop {
        match manager.submit_survey().await {
            Ok(_) => return Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "Survey submission failed");
                match prompt.ask("Try again? [y/N]").await? {
                    Some(answer) if answer.eq_ignore_ascii_case("y") => continue,
                    _ => return Ok(false),
                }
            }
        }
    }
}
