//! Language registration commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::fmt::Write;

use crate::config::Config;
use crate::sandbox::Language;

use super::open_catalog;

/// Language management actions.
#[derive(Subcommand, Debug)]
pub enum LangAction {
    /// Add a language or update an existing one
    Add {
        /// Language name
        name: String,

        /// Shell command that runs the program inside the container
        #[arg(long)]
        start_command: String,

        /// Path the submitted source is written to
        #[arg(long)]
        main_file: String,

        /// Run-phase time limit in milliseconds (default: from codebox.toml)
        #[arg(long)]
        time_limit_ms: Option<u64>,
    },

    /// List registered languages
    List,
}

/// Format the language table
pub fn format_languages(languages: &[Language]) -> String {
    let mut out = String::new();
    if languages.is_empty() {
        writeln!(&mut out, "{} No languages registered.", "ℹ".blue()).unwrap();
        return out;
    }

    for language in languages {
        writeln!(
            &mut out,
            "  {:<12} {:<32} {:<16} {}",
            language.name.cyan().bold(),
            language.start_command,
            language.main_file.dimmed(),
            format!("{} ms", language.time_limit_ms).yellow()
        )
        .unwrap();
    }
    out
}

/// Run language management command.
pub async fn run(config: &Config, action: LangAction) -> Result<()> {
    let catalog = open_catalog(config)?;

    match action {
        LangAction::Add {
            name,
            start_command,
            main_file,
            time_limit_ms,
        } => {
            let language = Language::new(name, start_command, main_file)
                .with_time_limit_ms(time_limit_ms.unwrap_or(config.runner.default_time_limit_ms));
            let name = language.name.clone();
            catalog.upsert_language(language)?;
            println!("{} Language {} saved", "✓".green(), name.cyan());
        }
        LangAction::List => {
            print!("{}", format_languages(&catalog.languages()?));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_languages_empty() {
        assert!(format_languages(&[]).contains("No languages registered"));
    }

    #[test]
    fn test_format_languages_rows() {
        let out = format_languages(&[
            Language::new("python", "python3 main.py", "main.py"),
            Language::new("c", "gcc main.c && ./a.out", "main.c").with_time_limit_ms(5000),
        ]);
        assert!(out.contains("python3 main.py"));
        assert!(out.contains("gcc main.c && ./a.out"));
        assert!(out.contains("5000 ms"));
        assert!(out.contains("20000 ms"));
    }
}
