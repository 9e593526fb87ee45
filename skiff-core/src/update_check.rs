use crate::config::SkiffConfig;
use crate::console;
use crate::registry::RequestManager;
use skiff_range::Version;
use std::time::{SystemTime, UNIX_EPOCH};
use std::{env, fs};

const CHECK_INTERVAL_SECS: u64 = 60 * 60 * 24;

/// A newer release was found; printed once after a successful install.
#[derive(Debug, Clone)]
pub struct UpgradeHint {
    pub current: String,
    pub latest: String,
    pub command: Option<String>,
    pub url: Option<String>,
}

impl UpgradeHint {
    pub fn print(&self) {
        console::info(&format!(
            "A new version of skiff is available: {} (you have {})",
            self.latest, self.current
        ));

        if let Some(command) = &self.command {
            console::command(command);
        } else if let Some(url) = &self.url {
            console::info(&format!("Download it from {}", url));
        }
    }
}

/// Best-effort check for a newer release. Every failure path returns
/// `None`; this can never affect the install outcome.
pub async fn check_for_update(
    config: &SkiffConfig,
    requests: &RequestManager,
) -> Option<UpgradeHint> {
    let current = env!("CARGO_PKG_VERSION");

    if !console::stdout_is_tty() {
        return None;
    }

    if env::var_os("CI").is_some() {
        return None;
    }

    if config.option_true("disable-self-update-check") {
        return None;
    }

    // pre-release builds never nag
    if current.contains('-') {
        return None;
    }

    if checked_recently(config) {
        return None;
    }

    let text = requests.get_text(&config.self_update_url()).await.ok()?;
    let latest = text.trim().trim_start_matches('v').to_string();

    let latest_version = Version::parse(&latest).ok()?;
    let current_version = Version::parse(current).ok()?;

    record_check_time(config);

    if latest_version <= current_version {
        return None;
    }

    let method = config.get_option("install-method").unwrap_or("tar");
    let (command, url) = upgrade_instructions(method);

    Some(UpgradeHint {
        current: current.to_string(),
        latest,
        command,
        url,
    })
}

fn checked_recently(config: &SkiffConfig) -> bool {
    let path = config.last_update_check_path();

    let Ok(data) = fs::read_to_string(&path) else {
        return false;
    };

    let Ok(last) = data.trim().parse::<u64>() else {
        return false;
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    now.saturating_sub(last) < CHECK_INTERVAL_SECS
}

fn record_check_time(config: &SkiffConfig) {
    let path = config.last_update_check_path();

    if let Some(parent) = path.parent()
        && fs::create_dir_all(parent).is_err()
    {
        return;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    let _ = fs::write(&path, now.to_string());
}

/// The shell command (or download URL) to suggest for an install method.
pub fn upgrade_instructions(method: &str) -> (Option<String>, Option<String>) {
    let command = match method {
        "tar" => Some("curl -fsSL https://get.skiffpkg.dev/install.sh | sh".to_string()),
        "homebrew" => Some("brew upgrade skiff".to_string()),
        "deb" => Some("sudo apt-get update && sudo apt-get install skiff".to_string()),
        "rpm" => Some("sudo yum install skiff".to_string()),
        "npm" => Some("npm install -g skiff".to_string()),
        "chocolatey" => Some("choco upgrade skiff".to_string()),
        "apk" => Some("apk update && apk add -u skiff".to_string()),
        _ => None,
    };

    let url = match method {
        "msi" => Some("https://get.skiffpkg.dev/latest.msi".to_string()),
        _ => None,
    };

    (command, url)
}
