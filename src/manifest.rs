//! The manifest language: a tokenizer and a line parser that compile a
//! manifest into an [`Inode`] tree.
//!
//! The language is line-oriented. Tokens are whitespace-separated, `;`
//! starts a comment that runs to the end of the line, and `"…"` quotes a
//! token (with `\c` escaping any single character, for embedding `"` and
//! `\`). Each line is `kind path [source] [attrs]`.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::tree::{Attributes, Inode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    Normal,
    String,
    Escaped,
    Comment,
}

/// Reads the manifest at `path` and compiles it.
pub fn parse_file(path: &Path) -> Result<Inode> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::HostIo {
        path: path.to_path_buf(),
        source,
    })?;

    parse_str(&text)
}

/// Compiles manifest text into a directory tree rooted at an unnamed
/// directory inode.
pub fn parse_str(text: &str) -> Result<Inode> {
    let mut root = Inode::root();

    let mut state = LexerState::Normal;
    let mut tokens: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_active = false;
    let mut line = 1usize;

    for ch in text.chars() {
        match state {
            LexerState::Normal => {
                if ch == '"' {
                    buffer_active = true;
                    state = LexerState::String;
                } else if ch == ';' {
                    state = LexerState::Comment;
                } else if ch.is_whitespace() {
                    if buffer_active {
                        tokens.push(std::mem::take(&mut buffer));
                        buffer_active = false;
                    }

                    if ch == '\n' && !tokens.is_empty() {
                        process_line(&mut root, &tokens, line)?;
                        tokens.clear();
                    }
                } else {
                    buffer.push(ch);
                    buffer_active = true;
                }
            }

            LexerState::String => {
                if ch == '\\' {
                    state = LexerState::Escaped;
                } else if ch == '"' {
                    state = LexerState::Normal;
                } else {
                    buffer.push(ch);
                }
            }

            LexerState::Escaped => {
                buffer.push(ch);
                state = LexerState::String;
            }

            LexerState::Comment => {
                if ch == '\n' {
                    if buffer_active {
                        tokens.push(std::mem::take(&mut buffer));
                        buffer_active = false;
                    }

                    if !tokens.is_empty() {
                        process_line(&mut root, &tokens, line)?;
                        tokens.clear();
                    }

                    state = LexerState::Normal;
                }
            }
        }

        if ch == '\n' {
            line += 1;
        }
    }

    if matches!(state, LexerState::String | LexerState::Escaped) {
        return Err(Error::ManifestParse {
            line,
            message: "end of file reached before closing quote".into(),
        });
    }

    if buffer_active || !tokens.is_empty() {
        return Err(Error::ManifestParse {
            line,
            message: "no newline at the end of file".into(),
        });
    }

    Ok(root)
}

fn process_line(root: &mut Inode, tokens: &[String], line: usize) -> Result<()> {
    let parse_err = |message: String| Error::ManifestParse { line, message };

    let mut it = tokens.iter();

    let kind = it
        .next()
        .ok_or_else(|| parse_err("no inode type is specified".into()))?;

    let is_file = match kind.as_str() {
        "file" => true,
        "dir" => false,
        other => return Err(parse_err(format!("unsupported inode type: {other}"))),
    };

    let path = it
        .next()
        .ok_or_else(|| parse_err("no inode name is specified".into()))?;

    let source: Option<PathBuf> = if is_file {
        Some(
            it.next()
                .ok_or_else(|| parse_err("no source file name is specified".into()))?
                .into(),
        )
    } else {
        None
    };

    let attributes = match it.next() {
        Some(attrs) => Some(parse_attributes(attrs, line)?),
        None => None,
    };

    if let Some(surplus) = it.next() {
        return Err(parse_err(format!("unexpected trailing token: {surplus}")));
    }

    debug!("manifest line {line}: {kind} {path}");

    create_inode(root, path, line, |name| {
        if let Some(source) = source {
            Inode::new_file(name, attributes, source)
        } else {
            Inode::new_directory(name, attributes)
        }
    })
}

fn parse_attributes(attrs: &str, line: usize) -> Result<Attributes> {
    let mut attributes = Attributes::empty();

    for letter in attrs.chars() {
        attributes |= match letter {
            'a' => Attributes::ARCHIVE,
            's' => Attributes::SYSTEM,
            'h' => Attributes::HIDDEN,
            'r' => Attributes::READ_ONLY,
            _ => {
                return Err(Error::ManifestParse {
                    line,
                    message: format!("unsupported attributes: {attrs}"),
                })
            }
        };
    }

    Ok(attributes)
}

/// Walks every path component except the last (each must exist and be a
/// directory) and creates the last with `make`.
fn create_inode(
    root: &mut Inode,
    path: &str,
    line: usize,
    make: impl FnOnce(String) -> Inode,
) -> Result<()> {
    let mut directory = root;
    let mut components = path.split('/').peekable();

    while let Some(component) = components.next() {
        if components.peek().is_none() {
            return directory
                .add_child(make(component.to_owned()))
                .map_err(|_| Error::DuplicateEntry {
                    path: path.to_owned(),
                    line,
                });
        }

        directory = match directory.child_mut(component) {
            Some(child) if child.is_dir() => child,
            Some(_) => {
                return Err(Error::NotADirectory {
                    path: path.to_owned(),
                    component: component.to_owned(),
                    line,
                })
            }
            None => {
                return Err(Error::MissingParent {
                    path: path.to_owned(),
                    component: component.to_owned(),
                    line,
                })
            }
        };
    }

    // `split('/')` yields at least one component for any input.
    unreachable!("empty component iterator")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(inode: &Inode) -> Vec<&str> {
        inode.children().map(|c| c.name()).collect()
    }

    #[test]
    fn parses_the_readme_example() {
        let root = parse_str(concat!(
            "dir  boot                    sh\n",
            "file boot/kernel.bin   build/kernel.bin\n",
            "dir  data\n",
            "file data/readme.txt   assets/readme.txt  r\n",
        ))
        .unwrap();

        assert_eq!(names(&root), ["boot", "data"]);

        let boot = root.children().next().unwrap();
        assert_eq!(
            boot.attributes(),
            Attributes::SYSTEM | Attributes::HIDDEN
        );
        assert_eq!(names(boot), ["kernel.bin"]);

        let kernel = boot.children().next().unwrap();
        assert_eq!(kernel.source().unwrap(), Path::new("build/kernel.bin"));
        assert_eq!(kernel.attributes(), Attributes::DEFAULT);
    }

    #[test]
    fn quoted_tokens_and_escapes() {
        let root = parse_str("file \"spaced name.txt\" \"with \\\"quote\\\\.bin\"\n").unwrap();

        let file = root.children().next().unwrap();
        assert_eq!(file.name(), "spaced name.txt");
        assert_eq!(file.source().unwrap(), Path::new("with \"quote\\.bin"));
    }

    #[test]
    fn comments_and_blank_lines() {
        let root = parse_str("; a comment\n\ndir a ; trailing\nfile a/b src/b\n").unwrap();

        assert_eq!(names(&root), ["a"]);
        assert_eq!(names(root.children().next().unwrap()), ["b"]);
    }

    #[test]
    fn comment_at_eof_without_newline_is_fine() {
        let root = parse_str("dir a\n; no newline after this").unwrap();
        assert_eq!(names(&root), ["a"]);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(
            parse_str("file \"oops\n"),
            Err(Error::ManifestParse { .. })
        ));
    }

    #[test]
    fn missing_final_newline_is_an_error() {
        assert!(matches!(
            parse_str("dir a\nfile a/b src/b"),
            Err(Error::ManifestParse { line: 2, .. })
        ));
    }

    #[test]
    fn unknown_kind_and_attributes() {
        assert!(matches!(
            parse_str("link a b\n"),
            Err(Error::ManifestParse { .. })
        ));
        assert!(matches!(
            parse_str("dir a x\n"),
            Err(Error::ManifestParse { .. })
        ));
    }

    #[test]
    fn file_without_source_is_an_error() {
        assert!(matches!(
            parse_str("file lonely.txt\n"),
            Err(Error::ManifestParse { .. })
        ));
    }

    #[test]
    fn duplicate_entries_are_reported_with_their_line() {
        assert!(matches!(
            parse_str("dir a\nfile a.txt one\nfile a.txt two\n"),
            Err(Error::DuplicateEntry { line: 3, .. })
        ));
    }

    #[test]
    fn missing_parent_and_not_a_directory() {
        assert!(matches!(
            parse_str("file a/b.txt src\n"),
            Err(Error::MissingParent { .. })
        ));
        assert!(matches!(
            parse_str("file a src\nfile a/b.txt src\n"),
            Err(Error::NotADirectory { .. })
        ));
    }
}
