// UI layer: credential prompts via `dialoguer` and progress display via
// `indicatif`. Everything here is optional decoration around the run; the
// library never prompts unless the binary asks it to.

use anyhow::Result;
use dialoguer::{Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Ask for whichever of email and password was not supplied.
///
/// `Password` hides the input in the terminal.
pub fn prompt_credentials(username: Option<String>, password: Option<String>) -> Result<(String, String)> {
    let username = match username {
        Some(u) => u,
        None => Input::new().with_prompt("Email").interact_text()?,
    };
    let password = match password {
        Some(p) => p,
        None => Password::new().with_prompt("Password").interact()?,
    };
    Ok((username, password))
}

/// Spinner shown while a blocking call is in flight.
pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Progress bar over the images of one folder, hidden when `show` is false
/// so tests and piped runs stay quiet.
pub fn folder_progress(show: bool, len: u64, folder: &str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_prefix(folder.to_string());
    bar
}
