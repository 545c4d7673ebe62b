use std::io::{self, BufRead, Write};

use anyhow::{bail, Context};

pub trait UI {
    fn get_username(&self) -> anyhow::Result<String>;
    fn get_password(&self) -> anyhow::Result<String>;
    fn error(&self, message: &str);
}

pub struct StdUI;

impl UI for StdUI {
    fn get_username(&self) -> anyhow::Result<String> {
        read_from_stdin("Username")
    }

    fn get_password(&self) -> anyhow::Result<String> {
        read_password_from_stdin("Password")
    }

    fn error(&self, message: &str) {
        eprintln!("{message}");
    }
}

pub fn read_from_stdin(prompt: &str) -> anyhow::Result<String> {
    let stdin = io::stdin();
    let mut text = String::new();
    while text.trim().is_empty() {
        print!("{prompt}: ");
        io::stdout().flush()?;
        text.clear();
        if stdin.lock().read_line(&mut text).context("Could not read from stdin")? == 0 {
            bail!("{prompt} is required");
        }
    }
    Ok(text.trim().to_string())
}

pub fn read_password_from_stdin(prompt: &str) -> anyhow::Result<String> {
    loop {
        let pass =
            rpassword::prompt_password(format!("{prompt}: ")).context("Could not read password")?;

        if pass.trim().is_empty() {
            continue;
        }
        return Ok(pass.trim().to_string());
    }
}
