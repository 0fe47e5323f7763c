//! Auth commands - mint and inspect GME AuthBuffers.

use std::io::Write;

use chrono::DateTime;
use clap::Subcommand;
use tracing::info;

use yt_core::config::{AppConfig, GmeConfig};
use yt_core::error::YtResult;
use yt_gme::{AuthBufferGenerator, AuthBufferPlaintext};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Generate an AuthBuffer for a user and voice room.
    Generate {
        /// User id (openid) the token is issued to.
        #[arg(short, long)]
        user: String,
        /// Voice room id.
        #[arg(short, long)]
        room: String,
        /// Seconds until the token expires (overrides config).
        #[arg(short, long)]
        expire: Option<u32>,
        /// Write raw ciphertext bytes instead of base64.
        #[arg(long)]
        raw: bool,
        /// 16-byte secret key (overrides config).
        #[arg(long)]
        key: Option<String>,
        /// GME sdk app id (overrides config).
        #[arg(long)]
        app_id: Option<u32>,
    },
    /// Decrypt a base64 AuthBuffer and print its fields.
    Verify {
        /// The token, base64 encoded.
        token: String,
        /// 16-byte secret key (overrides config).
        #[arg(long)]
        key: Option<String>,
    },
}

/// Run an auth subcommand.
pub fn run(config: &AppConfig, action: AuthAction) -> YtResult<()> {
    match action {
        AuthAction::Generate {
            user,
            room,
            expire,
            raw,
            key,
            app_id,
        } => {
            let gme = resolve_gme(&config.gme, key, app_id, expire);
            let generator = AuthBufferGenerator::from_config(&gme)?;
            if raw {
                let token = generator.generate(&user, &room)?;
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&token)?;
                stdout.flush()?;
            } else {
                println!("{}", generator.generate_base64(&user, &room)?);
            }
            info!(user = %user, room = %room, ttl = gme.ttl_secs, "authbuffer issued");
            Ok(())
        }
        AuthAction::Verify { token, key } => {
            let gme = resolve_gme(&config.gme, key, None, None);
            let generator = AuthBufferGenerator::from_config(&gme)?;
            let fields = generator.verify_base64(&token)?;
            for line in describe(&fields) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

/// Config with command-line overrides applied.
fn resolve_gme(
    base: &GmeConfig,
    key: Option<String>,
    app_id: Option<u32>,
    ttl: Option<u32>,
) -> GmeConfig {
    let mut gme = base.clone();
    if let Some(key) = key {
        gme.secret_key = key;
    }
    if let Some(app_id) = app_id {
        gme.sdk_app_id = app_id;
    }
    if let Some(ttl) = ttl {
        gme.ttl_secs = ttl;
    }
    gme
}

fn describe(fields: &AuthBufferPlaintext) -> Vec<String> {
    let expiry = DateTime::from_timestamp(i64::from(fields.expires_at), 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| fields.expires_at.to_string());
    let remaining = fields.remaining_validity();
    let status = if fields.is_expired() {
        format!("expired {}s ago", -remaining)
    } else {
        format!("valid for {remaining}s")
    };
    vec![
        format!("version:     {}", fields.version),
        format!("user_id:     {}", fields.user_id),
        format!("room_id:     {}", fields.room_id),
        format!("sdk_app_id:  {}", fields.sdk_app_id),
        format!("expires_at:  {expiry} ({status})"),
        format!(
            "reserved:    {} / {:#010x} / {}",
            fields.reserved1, fields.reserved2, fields.reserved3
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let base = GmeConfig::default();
        let gme = resolve_gme(&base, Some("IWajGHr5VTo3fd63".into()), Some(7), Some(60));
        assert_eq!(gme.secret_key, "IWajGHr5VTo3fd63");
        assert_eq!(gme.sdk_app_id, 7);
        assert_eq!(gme.ttl_secs, 60);

        let untouched = resolve_gme(&base, None, None, None);
        assert_eq!(untouched.sdk_app_id, base.sdk_app_id);
    }

    #[test]
    fn test_describe_reports_fields() {
        let fields =
            AuthBufferPlaintext::with_expiry("352080", "7868145", 1_400_113_874, 1).unwrap();
        let lines = describe(&fields);
        assert!(lines.iter().any(|l| l.contains("352080")));
        assert!(lines.iter().any(|l| l.contains("expired")));
        assert!(lines.iter().any(|l| l.contains("0xffffffff")));
    }
}
