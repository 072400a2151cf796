//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use reqwest::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use webistream_core::{ClientConfig, CredentialPair, CredentialStore, FileStore, take_persisted_toast};
use webistream_http::SessionClient;
use webistream_http::types::{
    Message, PhoneLoginRequest, PhoneOtpRequest, RegisterRequest, ResetPasswordRequest,
    VerifyEmailRequest, VerifyPhoneRequest,
};

use crate::router::Router;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        email: String,

        #[arg(long, env = "WEBISTREAM_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign in with a phone number and one-time code
    LoginPhone {
        phone_number: String,

        otp_code: String,

        /// Region hint for numbers without a country code
        #[arg(long)]
        region: Option<String>,
    },

    /// Finish an OAuth sign-in with the code from the provider redirect
    OauthCallback {
        /// Provider name, e.g. google
        provider: String,

        code: String,
    },

    /// Create an account
    Register {
        email: String,

        #[arg(long, env = "WEBISTREAM_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        full_name: Option<String>,

        #[arg(long)]
        phone_number: Option<String>,
    },

    /// Text a one-time login code to a phone number
    RequestPhoneOtp {
        phone_number: String,

        #[arg(long)]
        region: Option<String>,
    },

    /// Confirm a phone number with the code it received
    VerifyPhone {
        phone_number: String,

        otp_code: String,

        #[arg(long)]
        region: Option<String>,
    },

    /// Confirm an email address with the code sent to it
    VerifyEmail { email: String, otp_code: String },

    /// Send the email verification code again
    ResendVerification { email: String },

    /// Email a password reset link
    RecoverPassword { email: String },

    /// Set a new password with the token from the recovery email
    ResetPassword {
        token: String,

        #[arg(long, env = "WEBISTREAM_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },

    /// Forget the stored tokens
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Show configuration and session state
    Status,

    /// Send an authenticated request to the API
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the API base URL, e.g. /v1/webinars
        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
}

/// Everything a command needs, wired together once at startup
pub struct App {
    pub config: ClientConfig,
    pub data_dir: PathBuf,
    pub session: SessionClient,
    pub router: Arc<Router>,
}

impl App {
    /// Open the credential store and build the session client
    pub fn open(config: ClientConfig, data_dir: PathBuf) -> Result<Self> {
        let store_path = config.store_path(&data_dir);
        let store = FileStore::open(&store_path)
            .with_context(|| format!("Failed to open credential store {}", store_path.display()))?;
        let store: Arc<dyn CredentialStore> = Arc::new(store);

        let session = SessionClient::from_config(&config, store)?;

        Ok(Self {
            config,
            data_dir,
            session,
            router: Arc::new(Router::new()),
        })
    }
}

/// Show the notification left behind by an expiry, once
pub fn show_persisted_toast(store: &dyn CredentialStore) {
    if let Some(toast) = take_persisted_toast(store) {
        eprintln!("{}: {}", toast.title(), toast.description);
    }
}

impl Commands {
    pub async fn execute(self, app: &App) -> Result<()> {
        let session = &app.session;

        match self {
            Commands::Login { email, password } => {
                session.login_with_password(&email, &password).await?;
                println!("Logged in as {email}");
                Ok(())
            }
            Commands::LoginPhone {
                phone_number,
                otp_code,
                region,
            } => {
                session
                    .login_with_phone(&PhoneLoginRequest {
                        phone_number: phone_number.clone(),
                        otp_code,
                        region,
                    })
                    .await?;
                println!("Logged in as {phone_number}");
                Ok(())
            }
            Commands::OauthCallback { provider, code } => {
                session.complete_oauth(&provider, &code).await?;
                println!("Logged in with {provider}");
                Ok(())
            }
            Commands::Register {
                email,
                password,
                full_name,
                phone_number,
            } => {
                let response = session
                    .public()
                    .register(&RegisterRequest {
                        email: email.clone(),
                        password,
                        full_name,
                        phone_number,
                    })
                    .await?;
                match response.user {
                    Some(user) => println!("Registered {} ({})", user.email, user.id),
                    None => println!("Registered {email}"),
                }
                Ok(())
            }
            Commands::RequestPhoneOtp {
                phone_number,
                region,
            } => {
                let ack = session
                    .public()
                    .request_phone_otp(&PhoneOtpRequest {
                        phone_number: phone_number.clone(),
                        region,
                    })
                    .await?;
                print_ack(&ack, &format!("Code sent to {phone_number}"));
                Ok(())
            }
            Commands::VerifyPhone {
                phone_number,
                otp_code,
                region,
            } => {
                let ack = session
                    .public()
                    .verify_phone_otp(&VerifyPhoneRequest {
                        phone_number: phone_number.clone(),
                        otp_code,
                        region,
                    })
                    .await?;
                print_ack(&ack, &format!("Verified {phone_number}"));
                Ok(())
            }
            Commands::VerifyEmail { email, otp_code } => {
                let ack = session
                    .public()
                    .verify_email_otp(&VerifyEmailRequest {
                        email: email.clone(),
                        otp_code,
                    })
                    .await?;
                print_ack(&ack, &format!("Verified {email}"));
                Ok(())
            }
            Commands::ResendVerification { email } => {
                let ack = session.public().resend_email_verification(&email).await?;
                print_ack(&ack, &format!("Verification code sent to {email}"));
                Ok(())
            }
            Commands::RecoverPassword { email } => {
                let ack = session.public().recover_password(&email).await?;
                print_ack(&ack, &format!("Recovery email sent to {email}"));
                Ok(())
            }
            Commands::ResetPassword {
                token,
                new_password,
            } => {
                let ack = session
                    .public()
                    .reset_password(&ResetPasswordRequest {
                        new_password,
                        token,
                    })
                    .await?;
                print_ack(&ack, "Password updated");
                Ok(())
            }
            Commands::Logout => {
                session.logout()?;
                println!("Logged out");
                Ok(())
            }
            Commands::Whoami => {
                if !session.is_logged_in() {
                    bail!("Not logged in. Run `webistream login` first.");
                }
                match session.current_user().await? {
                    Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                    None => println!("No user returned"),
                }
                Ok(())
            }
            Commands::Status => {
                print_status(app);
                Ok(())
            }
            Commands::Request { method, path, body } => {
                send_request(session, &method, &path, body.as_deref()).await
            }
        }
    }
}

fn print_ack(ack: &Message, fallback: &str) {
    println!("{}", ack_line(ack, fallback));
}

fn ack_line<'a>(ack: &'a Message, fallback: &'a str) -> &'a str {
    match ack.message.as_deref() {
        Some(message) if !message.trim().is_empty() => message,
        _ => fallback,
    }
}

fn print_status(app: &App) {
    let credentials = CredentialPair::load(app.session.store().as_ref());

    println!("API:          {}", app.config.api_url);
    println!("Data dir:     {}", app.data_dir.display());
    println!(
        "Store:        {}",
        app.config.store_path(&app.data_dir).display()
    );
    println!("Logged in:    {}", credentials.access_token.is_some());
    println!("Refreshable:  {}", credentials.refresh_token.is_some());
    if let Some(expires_at) = credentials.refresh_expires_at {
        println!("Refresh until {}", expires_at.to_rfc3339());
    }
}

async fn send_request(
    session: &SessionClient,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<()> {
    let method = parse_method(method)?;
    let path = normalize_path(path);

    let mut request = session.request(method.clone(), &path);
    if let Some(body) = body {
        let json: serde_json::Value =
            serde_json::from_str(body).context("--body must be valid JSON")?;
        request = request.json(&json);
    }

    info!(%method, %path, "Sending request");
    let response = session.send(request).await?;
    let status = response.status();
    let text = response.text().await?;

    println!("{status}");
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => println!("{text}"),
        Err(_) => {}
    }

    if !status.is_success() {
        bail!("Request failed with status {status}");
    }
    Ok(())
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{method}'"))
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Log file and credential store live side by side in the data directory
pub fn ensure_data_dir(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))
}
