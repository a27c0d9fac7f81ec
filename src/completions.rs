use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap_complete::{generate, Shell};

use crate::app::AppError;

const BIN_NAME: &str = "plangraph";

pub fn generate_completions(shell: Shell, buf: &mut dyn Write) {
    let mut cmd = crate::cli::styled_command();
    generate(shell, &mut cmd, BIN_NAME, buf);
}

fn shell_from_name(raw: &str) -> Option<Shell> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "powershell" | "pwsh" => Some(Shell::PowerShell),
        _ => None,
    }
}

pub fn detect_current_shell() -> Option<Shell> {
    let shell_var = std::env::var("SHELL").ok()?;
    shell_from_name(shell_var.rsplit('/').next()?)
}

/// Per-user completion file locations. Zsh needs `~/.zfunc` on `fpath`.
fn install_path(shell: Shell, home: &Path) -> Option<PathBuf> {
    match shell {
        Shell::Bash => Some(home.join(".local/share/bash-completion/completions").join(BIN_NAME)),
        Shell::Zsh => Some(home.join(".zfunc").join(format!("_{BIN_NAME}"))),
        Shell::Fish => Some(home.join(".config/fish/completions").join(format!("{BIN_NAME}.fish"))),
        _ => None,
    }
}

fn install_under(shell: Shell, home: &Path) -> io::Result<PathBuf> {
    let path = install_path(shell, home).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no install path for {shell:?}"),
        )
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    generate_completions(shell, &mut buf);
    std::fs::write(&path, buf)?;
    Ok(path)
}

pub fn run_completions_command(shell_arg: Option<&str>, install: bool) -> Result<(), AppError> {
    let shell = match shell_arg {
        Some(name) => shell_from_name(name)
            .ok_or_else(|| AppError::InvalidArgument(format!("unknown shell '{name}'")))?,
        None => detect_current_shell().ok_or_else(|| {
            AppError::InvalidArgument(
                "unable to detect shell from $SHELL; pass a shell name".to_string(),
            )
        })?,
    };

    if install {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| AppError::InvalidArgument("HOME is not set".to_string()))?;
        let path = install_under(shell, &home)?;
        println!("completions installed to {}", path.display());
        if shell == Shell::Zsh {
            println!("add `fpath=(~/.zfunc $fpath)` before compinit in ~/.zshrc");
        }
    } else {
        let mut stdout = io::stdout().lock();
        generate_completions(shell, &mut stdout);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_names_are_case_insensitive() {
        assert_eq!(shell_from_name("BASH"), Some(Shell::Bash));
        assert_eq!(shell_from_name("Zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_name("pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_name("csh"), None);
    }

    #[test]
    fn bash_completions_mention_subcommands() {
        let mut buf = Vec::new();
        generate_completions(Shell::Bash, &mut buf);
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains(BIN_NAME));
        assert!(text.contains("promote"));
    }

    #[test]
    fn installs_into_per_user_locations() {
        let home = std::env::temp_dir().join(format!("plangraph-comp-{}", uuid::Uuid::now_v7()));
        let bash = install_under(Shell::Bash, &home).expect("bash install should succeed");
        assert!(bash.ends_with("bash-completion/completions/plangraph"));
        assert!(bash.exists());
        let zsh = install_under(Shell::Zsh, &home).expect("zsh install should succeed");
        assert!(zsh.ends_with(".zfunc/_plangraph"));
        let fish = install_under(Shell::Fish, &home).expect("fish install should succeed");
        assert!(fish.exists());
        assert!(install_under(Shell::Elvish, &home).is_err());
        let _ = std::fs::remove_dir_all(home);
    }

    #[test]
    fn unknown_shell_is_an_invalid_argument() {
        assert!(matches!(
            run_completions_command(Some("nonsense"), false),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
