use super::types::{AppConfig, LocationConfig, ServerConfig};
use std::fmt;

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m"
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mPorts:\x1b[0m       \x1b[1;32m{:?}\x1b[0m",
            self.ports
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mServer names:\x1b[0m \x1b[36m{}\x1b[0m",
            if self.server_names.is_empty() {
                "_".to_string()
            } else {
                self.server_names.join(", ")
            }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mRoot:\x1b[0m        \x1b[32m{}\x1b[0m",
            self.root.display()
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mDefault:\x1b[0m     \x1b[{}m{}\x1b[0m",
            if self.default_server { "32" } else { "31" },
            if self.default_server { "YES" } else { "NO" }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody Limit:\x1b[0m  \x1b[33m{} KB\x1b[0m",
            self.client_max_body_size / 1024
        )?;

        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mError Pages:\x1b[0m")?;
            let mut pages: Vec<_> = self.error_pages.iter().collect();
            pages.sort_by_key(|(code, _)| **code);
            for (code, path) in pages {
                writeln!(f, "    \x1b[38;5;244m{:4}\x1b[0m → \x1b[31m{}\x1b[0m", code, path)?;
            }
        }

        writeln!(
            f,
            "\n  \x1b[1;37m📋 LOCATIONS ({}) \x1b[0m",
            self.locations.len()
        )?;
        writeln!(
            f,
            "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m"
        )?;

        let mut sorted = self.locations.clone();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        for (idx, loc) in sorted.iter().enumerate() {
            let is_last = idx == sorted.len() - 1;
            let branch = if is_last { "  └──" } else { "  ├──" };
            writeln!(f, "  \x1b[38;5;244m{}\x1b[0m \x1b[1;37m{}\x1b[0m", branch, loc.path)?;
            loc.fmt_details(f, is_last)?;
            if !is_last {
                writeln!(f, "  \x1b[38;5;244m    │\x1b[0m")?;
            }
        }
        Ok(())
    }
}

impl LocationConfig {
    fn fmt_details(&self, f: &mut fmt::Formatter<'_>, is_last: bool) -> fmt::Result {
        let indent = if is_last { "     " } else { "  │  " };
        let methods = if self.allow_methods.is_empty() {
            "ALL".to_string()
        } else {
            self.allow_methods
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        };

        writeln!(f, "  \x1b[38;5;250m{}├─ Methods:\x1b[0m {}", indent, methods)?;
        if let Some(root) = &self.root {
            writeln!(f, "  \x1b[38;5;250m{}├─ Root:\x1b[0m {}", indent, root.display())?;
        }
        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Autoindex:\x1b[0m \x1b[{}m{}\x1b[0m",
            indent,
            if self.autoindex { "32" } else { "31" },
            if self.autoindex { "ON" } else { "OFF" }
        )?;
        if let Some((code, target)) = &self.redirect {
            writeln!(
                f,
                "  \x1b[38;5;250m{}├─ Redirect:\x1b[0m \x1b[35m{} → {}\x1b[0m",
                indent, code, target
            )?;
        }
        if let Some(path) = &self.upload_path {
            writeln!(f, "  \x1b[38;5;250m{}├─ Upload:\x1b[0m {}", indent, path.display())?;
        }
        if let Some(ext) = &self.cgi_ext {
            writeln!(
                f,
                "  \x1b[38;5;250m{}└─ CGI:\x1b[0m \x1b[38;5;208m{} ({}s timeout)\x1b[0m",
                indent,
                ext,
                self.cgi_timeout.as_secs()
            )?;
        } else {
            writeln!(f, "  \x1b[38;5;250m{}└─ CGI:\x1b[0m \x1b[31mDISABLED\x1b[0m", indent)?;
        }
        Ok(())
    }
}

pub fn display_config(config: &AppConfig) {
    println!("\n\x1b[1;35m 🌐 WEBSERV CONFIGURATION\x1b[0m");
    println!(
        "\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m"
    );
    for (i, server) in config.servers.iter().enumerate() {
        println!("\n  \x1b[1;37mSERVER BLOCK {:02}\x1b[0m", i + 1);
        print!("{}", server);
    }
    println!(
        "\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m"
    );
    println!(" \x1b[1;32m✔\x1b[0m Configuration loaded — ready for requests\n");
}
