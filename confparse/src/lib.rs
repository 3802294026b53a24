//! Generic reader for the brace-and-semicolon configuration grammar
//! (spec.md §6). This crate knows nothing about `ServerConfig` or
//! `LocationConfig` — it turns source text into a tree of `Block`s and
//! `Directive`s; `webserv::config` walks that tree into the domain model.

pub mod lexer;

use lexer::{Lexer, Loc, Token, TokenKind};
use std::fmt;

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " ({})", loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub type ParseResult<T> = Result<T, ConfigError>;

/// A single `key arg...;` line inside a block.
#[derive(Debug, Clone)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub loc: Loc,
}

/// A `name arg... { ... }` block: `server { ... }`, `location /api { ... }`.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub args: Vec<String>,
    pub directives: Vec<Directive>,
    pub blocks: Vec<Block>,
    pub loc: Loc,
}

impl Block {
    pub fn directive(&self, name: &str) -> Option<&Directive> {
        self.directives.iter().find(|d| d.name == name)
    }

    pub fn directives_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Directive> {
        self.directives.iter().filter(move |d| d.name == name)
    }

    pub fn blocks_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Block> {
        self.blocks.iter().filter(move |b| b.name == name)
    }
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.cursor).cloned();
        if t.is_some() {
            self.cursor += 1;
        }
        t
    }

    fn loc(&self) -> Option<Loc> {
        self.peek().map(|t| t.loc)
    }

    /// Parses a sequence of statements until EOF or a closing brace,
    /// returning the directives and sub-blocks collected at this level.
    fn parse_body(&mut self) -> ParseResult<(Vec<Directive>, Vec<Block>)> {
        let mut directives = Vec::new();
        let mut blocks = Vec::new();

        loop {
            match self.peek().map(|t| &t.kind) {
                None | Some(TokenKind::RBrace) => break,
                Some(TokenKind::Word(_)) => {
                    let loc = self.loc().unwrap();
                    let mut words = Vec::new();
                    while let Some(TokenKind::Word(w)) = self.peek().map(|t| &t.kind) {
                        words.push(w.clone());
                        self.bump();
                    }
                    match self.peek().map(|t| &t.kind) {
                        Some(TokenKind::Semicolon) => {
                            self.bump();
                            if words.is_empty() {
                                return Err(ConfigError {
                                    message: "empty directive".into(),
                                    loc: Some(loc),
                                });
                            }
                            let name = words.remove(0);
                            directives.push(Directive {
                                name,
                                args: words,
                                loc,
                            });
                        }
                        Some(TokenKind::LBrace) => {
                            self.bump();
                            if words.is_empty() {
                                return Err(ConfigError {
                                    message: "empty block name".into(),
                                    loc: Some(loc),
                                });
                            }
                            let name = words.remove(0);
                            let (inner_directives, inner_blocks) = self.parse_body()?;
                            self.expect_rbrace(loc)?;
                            blocks.push(Block {
                                name,
                                args: words,
                                directives: inner_directives,
                                blocks: inner_blocks,
                                loc,
                            });
                        }
                        other => {
                            return Err(ConfigError {
                                message: format!(
                                    "expected ';' or '{{' after '{}', found {:?}",
                                    words.join(" "),
                                    other
                                ),
                                loc: self.loc(),
                            });
                        }
                    }
                }
                other => {
                    return Err(ConfigError {
                        message: format!("unexpected token {:?}", other),
                        loc: self.loc(),
                    });
                }
            }
        }

        Ok((directives, blocks))
    }

    fn expect_rbrace(&mut self, opened_at: Loc) -> ParseResult<()> {
        match self.bump() {
            Some(Token {
                kind: TokenKind::RBrace,
                ..
            }) => Ok(()),
            Some(t) => Err(ConfigError {
                message: format!("expected '}}', found {:?}", t.kind),
                loc: Some(t.loc),
            }),
            None => Err(ConfigError {
                message: "unexpected end of file, unclosed block".into(),
                loc: Some(opened_at),
            }),
        }
    }
}

/// Parses `input` into a list of top-level blocks (normally just `server`
/// blocks; bare top-level directives are rejected, spec.md's grammar has
/// no use for them).
pub fn parse_config(input: &str) -> ParseResult<Vec<Block>> {
    let tokens = Lexer::new(input)
        .tokenize()
        .map_err(|message| ConfigError { message, loc: None })?;
    let mut parser = Parser { tokens, cursor: 0 };
    let (directives, blocks) = parser.parse_body()?;
    if let Some(d) = directives.first() {
        return Err(ConfigError {
            message: format!("directive '{}' not allowed at top level", d.name),
            loc: Some(d.loc),
        });
    }
    if parser.cursor != parser.tokens.len() {
        return Err(ConfigError {
            message: "unexpected trailing '}'".into(),
            loc: parser.loc(),
        });
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_blocks_and_directives() {
        let src = r#"
            server {
                listen 8080;
                server_name example.com www.example.com;
                root /var/www;

                location / {
                    index index.html;
                    autoindex on;
                }
            }
        "#;
        let blocks = parse_config(src).unwrap();
        assert_eq!(blocks.len(), 1);
        let server = &blocks[0];
        assert_eq!(server.name, "server");
        assert_eq!(server.directive("listen").unwrap().args, vec!["8080"]);
        assert_eq!(
            server.directive("server_name").unwrap().args,
            vec!["example.com", "www.example.com"]
        );
        assert_eq!(server.blocks.len(), 1);
        assert_eq!(server.blocks[0].name, "location");
        assert_eq!(server.blocks[0].args, vec!["/"]);
    }

    #[test]
    fn skips_comments() {
        let src = "server {\n  # comment\n  listen 80; # trailing comment\n}";
        let blocks = parse_config(src).unwrap();
        assert_eq!(blocks[0].directive("listen").unwrap().args, vec!["80"]);
    }

    #[test]
    fn rejects_unclosed_block() {
        let src = "server {\n listen 80;\n";
        assert!(parse_config(src).is_err());
    }

    #[test]
    fn rejects_top_level_directive() {
        let src = "listen 80;\nserver { root /x; }";
        assert!(parse_config(src).is_err());
    }

    #[test]
    fn multiple_locations_and_nested_args() {
        let src = r#"
            server {
                listen 80;
                location /upload {
                    upload_path /var/uploads;
                    client_max_body_size 10M;
                }
                location /cgi-bin {
                    cgi_path /usr/bin/python3;
                    cgi_ext .py;
                }
            }
        "#;
        let blocks = parse_config(src).unwrap();
        assert_eq!(blocks[0].blocks_named("location").count(), 2);
    }
}
