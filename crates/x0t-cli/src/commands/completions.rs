//! `x0t completions` - print a tab-completion script

use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::{generate, Shell};
use std::io::{self, Write};

use crate::args::Args as CliArgs;

/// Arguments of `x0t completions`
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell; redirect the output into its completion directory
    #[arg(value_enum)]
    pub shell: CompletionShell,
}

/// Shells clap_complete can target
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

/// Write the script for every `x0t` subcommand and flag to stdout
pub fn execute(args: CompletionsArgs) -> Result<()> {
    let mut cmd = CliArgs::command();
    let name = cmd.get_name().to_string();
    let mut out = io::stdout().lock();
    generate(Shell::from(args.shell), &mut cmd, name, &mut out);
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_names() {
        let names: Vec<_> = CompletionShell::value_variants()
            .iter()
            .filter_map(|s| s.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, ["bash", "zsh", "fish", "powershell", "elvish"]);
    }
}
