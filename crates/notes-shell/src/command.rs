//! Line parser for shell commands.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command: {0} (try `help`)")]
    UnknownCommand(String),

    #[error("`{command}` needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("Unterminated quote")]
    UnterminatedQuote,
}

/// One parsed input line.
///
/// Note and folder arguments are selectors: an id, a unique id prefix, or
/// an exact title/name. `-` as a destination means top level / unfiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tree,
    Ls(Option<String>),
    Mkdir { name: String, parent: Option<String> },
    New { title: Option<String>, folder: Option<String> },
    Open(String),
    Type(String),
    Title(String),
    Save,
    Show,
    Status,
    RenameNote { note: String, title: String },
    RenameFolder { folder: String, name: String },
    Mv { note: String, folder: Option<String> },
    Mvdir { folder: String, parent: Option<String> },
    Rm(String),
    Rmdir(String),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  tree                         folder tree with notes
  ls [folder]                  notes in a folder (unfiled without one)
  mkdir <name> [parent]        create a folder
  new [title] [folder]         create a note and open it
  open <note>                  open a note
  type <text>                  replace the open note's body (autosaves)
  title <text>                 replace the open note's title
  save                         save the open note now
  show                         print the open note
  status                       save state of the open note
  rename-note <note> <title>   rename a note
  rename-folder <folder> <name>
  mv <note> <folder|->         file a note (- = unfiled)
  mvdir <folder> <parent|->    move a folder (- = top level)
  rm <note>                    delete a note
  rmdir <folder>               delete a folder and everything in it
  help, quit";

/// Split on whitespace, keeping double-quoted runs together.
fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quoted {
        return Err(ParseError::UnterminatedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn required(
    args: &mut impl Iterator<Item = String>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, ParseError> {
    args.next()
        .ok_or(ParseError::MissingArgument { command, argument })
}

fn destination(token: Option<String>) -> Option<String> {
    token.filter(|t| t != "-")
}

impl Command {
    /// Parse a line. Blank lines give `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        if word.is_empty() {
            return Ok(None);
        }

        // Free text: keep the rest of the line as typed
        match word {
            "type" => return Ok(Some(Command::Type(rest.to_string()))),
            "title" if rest.is_empty() => {
                return Err(ParseError::MissingArgument {
                    command: "title",
                    argument: "a title",
                })
            }
            "title" => return Ok(Some(Command::Title(rest.to_string()))),
            _ => {}
        }

        let mut args = tokenize(rest)?.into_iter();

        let command = match word {
            "tree" => Command::Tree,
            "ls" => Command::Ls(args.next()),
            "mkdir" => Command::Mkdir {
                name: required(&mut args, "mkdir", "a name")?,
                parent: args.next(),
            },
            "new" => Command::New {
                title: args.next(),
                folder: args.next(),
            },
            "open" => Command::Open(required(&mut args, "open", "a note")?),
            "save" => Command::Save,
            "show" => Command::Show,
            "status" => Command::Status,
            "rename-note" => {
                let note = required(&mut args, "rename-note", "a note")?;
                let title: Vec<String> = args.collect();
                if title.is_empty() {
                    return Err(ParseError::MissingArgument {
                        command: "rename-note",
                        argument: "a title",
                    });
                }
                Command::RenameNote {
                    note,
                    title: title.join(" "),
                }
            }
            "rename-folder" => {
                let folder = required(&mut args, "rename-folder", "a folder")?;
                let name: Vec<String> = args.collect();
                if name.is_empty() {
                    return Err(ParseError::MissingArgument {
                        command: "rename-folder",
                        argument: "a name",
                    });
                }
                Command::RenameFolder {
                    folder,
                    name: name.join(" "),
                }
            }
            "mv" => Command::Mv {
                note: required(&mut args, "mv", "a note")?,
                folder: destination(Some(required(&mut args, "mv", "a folder or -")?)),
            },
            "mvdir" => Command::Mvdir {
                folder: required(&mut args, "mvdir", "a folder")?,
                parent: destination(Some(required(&mut args, "mvdir", "a parent folder or -")?)),
            },
            "rm" => Command::Rm(required(&mut args, "rm", "a note")?),
            "rmdir" => Command::Rmdir(required(&mut args, "rmdir", "a folder")?),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}
