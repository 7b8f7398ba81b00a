//! Fixed per-language commands for the shared run process.
//!
//! Every template is a `sh -c` script executed with the workspace root as
//! its working directory. Compiled languages build into `.loom/` (a dot
//! directory, so the file watcher ignores it) and then execute the result.

use crate::error::{Result, TerminalError};

/// Build output directory, relative to the workspace root.
const BUILD_DIR: &str = ".loom";

/// How a language is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    /// `<program> <entry>`
    Interpreted(&'static str),
    /// `<compiler> <entry> -o .loom/main && ./.loom/main`
    Compiled(&'static str),
    /// `javac` then `java` on the entry's class.
    Java,
    /// Long-running dev server; the entry is ignored.
    DevServer,
}

/// Languages accepted by `processRun`, with their default entry file.
const LANGUAGES: &[(&str, Template, &str)] = &[
    ("python", Template::Interpreted("python3 -u"), "main.py"),
    ("javascript", Template::Interpreted("node"), "index.js"),
    ("node", Template::Interpreted("node"), "index.js"),
    ("typescript", Template::Interpreted("npx tsx"), "index.ts"),
    ("shell", Template::Interpreted("sh"), "main.sh"),
    ("bash", Template::Interpreted("bash"), "main.sh"),
    ("sh", Template::Interpreted("sh"), "main.sh"),
    ("go", Template::Interpreted("go run"), "main.go"),
    ("ruby", Template::Interpreted("ruby"), "main.rb"),
    ("c", Template::Compiled("cc"), "main.c"),
    ("cpp", Template::Compiled("g++"), "main.cpp"),
    ("rust", Template::Compiled("rustc"), "main.rs"),
    ("java", Template::Java, "Main.java"),
    ("react", Template::DevServer, ""),
    ("nextjs", Template::DevServer, ""),
    ("vite", Template::DevServer, ""),
    ("vue", Template::DevServer, ""),
];

/// Names accepted by [`run_command`].
pub fn supported_languages() -> impl Iterator<Item = &'static str> {
    LANGUAGES.iter().map(|(name, _, _)| *name)
}

/// Resolve the shell script for `language`, optionally overriding the entry
/// file (a workspace path such as `/src/app.py`).
///
/// An unknown language yields [`TerminalError::UnsupportedLanguage`]; nothing
/// should be spawned or killed in that case.
pub fn run_command(language: &str, entry: Option<&str>) -> Result<String> {
    let language = language.trim().to_ascii_lowercase();
    let Some((_, template, default_entry)) =
        LANGUAGES.iter().find(|(name, _, _)| *name == language)
    else {
        return Err(TerminalError::UnsupportedLanguage(language));
    };

    let script = match *template {
        Template::DevServer => "npm install && npm run dev".to_string(),
        Template::Interpreted(program) => {
            let entry = entry_or_default(entry, default_entry)?;
            format!("{} {}", program, shell_quote(&entry))
        }
        Template::Compiled(compiler) => {
            let entry = entry_or_default(entry, default_entry)?;
            format!(
                "mkdir -p {dir} && {compiler} {entry} -o {dir}/main && ./{dir}/main",
                dir = BUILD_DIR,
                entry = shell_quote(&entry)
            )
        }
        Template::Java => {
            let entry = entry_or_default(entry, default_entry)?;
            let class = entry
                .rsplit('/')
                .next()
                .and_then(|name| name.strip_suffix(".java"))
                .unwrap_or("Main");
            format!(
                "mkdir -p {dir} && javac -d {dir} {entry} && java -cp {dir} {class}",
                dir = BUILD_DIR,
                entry = shell_quote(&entry),
                class = shell_quote(class)
            )
        }
    };
    Ok(script)
}

fn entry_or_default(entry: Option<&str>, default_entry: &str) -> Result<String> {
    match entry.map(str::trim).filter(|e| !e.is_empty()) {
        Some(raw) => normalize_entry(raw),
        None => Ok(default_entry.to_string()),
    }
}

/// Strip the leading `/` and reject anything that could leave the root.
fn normalize_entry(raw: &str) -> Result<String> {
    let segments: Vec<&str> = raw
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.is_empty() || segments.contains(&"..") || raw.contains('\0') {
        return Err(TerminalError::InvalidEntry(raw.to_string()));
    }
    Ok(segments.join("/"))
}

/// Single-quote for `sh`.
fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(run_command("python", None).unwrap(), "python3 -u main.py");
        assert_eq!(run_command("Node", None).unwrap(), "node index.js");
        assert_eq!(run_command("typescript", None).unwrap(), "npx tsx index.ts");
        assert_eq!(run_command("react", Some("/ignored.js")).unwrap(), "npm install && npm run dev");
    }

    #[test]
    fn test_entry_override() {
        assert_eq!(
            run_command("python", Some("/src/app.py")).unwrap(),
            "python3 -u src/app.py"
        );
        assert_eq!(
            run_command("shell", Some("/my script.sh")).unwrap(),
            "sh 'my script.sh'"
        );
    }

    #[test]
    fn test_compiled_languages() {
        assert_eq!(
            run_command("c", None).unwrap(),
            "mkdir -p .loom && cc main.c -o .loom/main && ./.loom/main"
        );
        assert_eq!(
            run_command("java", Some("/src/Hello.java")).unwrap(),
            "mkdir -p .loom && javac -d .loom src/Hello.java && java -cp .loom Hello"
        );
    }

    #[test]
    fn test_unsupported_language() {
        let err = run_command("cobol", None).unwrap_err();
        assert!(matches!(err, TerminalError::UnsupportedLanguage(_)));
        assert_eq!(err.to_string(), "Language not supported");
    }

    #[test]
    fn test_entry_cannot_escape() {
        assert!(matches!(
            run_command("python", Some("/../etc/x.py")),
            Err(TerminalError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("a/b.py"), "a/b.py");
    }

    #[test]
    fn test_supported_languages_listed() {
        let langs: Vec<_> = supported_languages().collect();
        assert!(langs.contains(&"python"));
        assert!(langs.contains(&"vite"));
    }
}
