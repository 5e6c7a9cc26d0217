use crate::Error;
use serde::{Deserialize, Serialize};

/// What to run: either a command line or a pre-tokenized argv.
///
/// A `Line` is handed to `/bin/sh -c` when the owning [`Ward`](crate::Ward)
/// runs in shell mode, and word-split with POSIX shell lexical rules
/// otherwise. An `Argv` is always executed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmd {
    Line(String),
    Argv(Vec<String>),
}

impl Cmd {
    /// Resolves into the argv that will actually be spawned.
    pub(crate) fn resolve(&self, shell: bool) -> Result<Vec<String>, Error> {
        let argv = match self {
            Cmd::Line(line) if shell => {
                vec!["/bin/sh".to_string(), "-c".to_string(), line.clone()]
            }
            Cmd::Line(line) => shell_words::split(line)?,
            Cmd::Argv(argv) => argv.clone(),
        };
        if argv.is_empty() || argv[0].is_empty() {
            return Err(Error::EmptyCommand);
        }
        Ok(argv)
    }
}

impl From<&str> for Cmd {
    fn from(line: &str) -> Cmd {
        Cmd::Line(line.to_string())
    }
}

impl From<String> for Cmd {
    fn from(line: String) -> Cmd {
        Cmd::Line(line)
    }
}

impl From<Vec<String>> for Cmd {
    fn from(argv: Vec<String>) -> Cmd {
        Cmd::Argv(argv)
    }
}

impl From<&[&str]> for Cmd {
    fn from(argv: &[&str]) -> Cmd {
        Cmd::Argv(argv.iter().map(|a| a.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Cmd {
    fn from(argv: [&str; N]) -> Cmd {
        Cmd::Argv(argv.iter().map(|a| a.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_line_wraps_in_sh() {
        let argv = Cmd::from("echo 'a b'").resolve(true).unwrap();
        assert_eq!(argv, vec!["/bin/sh", "-c", "echo 'a b'"]);
    }

    #[test]
    fn plain_line_is_word_split() {
        let argv = Cmd::from("grep -F 'a b' file").resolve(false).unwrap();
        assert_eq!(argv, vec!["grep", "-F", "a b", "file"]);
    }

    #[test]
    fn argv_ignores_shell_flag() {
        let argv = Cmd::from(["printf", "%s", "a b"]).resolve(true).unwrap();
        assert_eq!(argv, vec!["printf", "%s", "a b"]);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            Cmd::from("").resolve(false),
            Err(Error::EmptyCommand)
        ));
        assert!(matches!(
            Cmd::Argv(Vec::new()).resolve(false),
            Err(Error::EmptyCommand)
        ));
    }

    #[test]
    fn unbalanced_quote_is_an_error() {
        assert!(matches!(
            Cmd::from("echo 'oops").resolve(false),
            Err(Error::CmdSplit(_))
        ));
    }
}
