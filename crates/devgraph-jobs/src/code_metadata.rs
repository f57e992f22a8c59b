//! Language-specific metadata of an ingested source file.
//!
//! Declarations are detected line by line with per-language patterns. This
//! is deliberately shallow: it finds top-level names well enough to link
//! conversations to code, not to build a syntax tree.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Symbols and file traits derived from source content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeMetadata {
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub types: Vec<String>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub is_test_file: bool,
    pub is_config_file: bool,
    pub line_count: usize,
}

impl CodeMetadata {
    /// Read the metadata back from a stored CodeEntity. Missing keys are empty.
    pub fn from_json(value: &JsonValue) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Declared names, functions first.
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .chain(&self.classes)
            .chain(&self.types)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclKind {
    Function,
    Class,
    Type,
}

/// Detect programming language from a file extension.
pub fn detect_language(file_path: &str) -> Option<&'static str> {
    let name = basename(file_path);
    let (_, ext) = name.rsplit_once('.')?;
    match ext.to_lowercase().as_str() {
        "rs" => Some("rust"),
        "py" => Some("python"),
        "js" | "mjs" | "cjs" | "jsx" => Some("javascript"),
        "ts" | "mts" | "cts" | "tsx" => Some("typescript"),
        "go" => Some("go"),
        "java" => Some("java"),
        "kt" | "kts" => Some("kotlin"),
        "rb" => Some("ruby"),
        "c" | "h" => Some("c"),
        "cpp" | "cxx" | "cc" | "hpp" | "hxx" => Some("cpp"),
        "cs" => Some("csharp"),
        "swift" => Some("swift"),
        "php" => Some("php"),
        "sh" | "bash" | "zsh" => Some("shell"),
        "json" => Some("json"),
        "toml" => Some("toml"),
        "yaml" | "yml" => Some("yaml"),
        "md" => Some("markdown"),
        "sql" => Some("sql"),
        _ => None,
    }
}

/// Last path component.
pub fn basename(file_path: &str) -> &str {
    file_path
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_path)
}

/// Patterns shared by a family of languages.
fn family(language: &str) -> &str {
    match language {
        "javascript" | "typescript" => "js",
        "java" | "kotlin" | "csharp" | "swift" | "php" => "java",
        other => other,
    }
}

fn compile(table: &[(&'static str, DeclKind, &str)]) -> Vec<(&'static str, DeclKind, Regex)> {
    table
        .iter()
        .filter_map(|(family, kind, pattern)| {
            Regex::new(pattern).ok().map(|re| (*family, *kind, re))
        })
        .collect()
}

static DECLARATIONS: Lazy<Vec<(&'static str, DeclKind, Regex)>> = Lazy::new(|| {
    compile(&[
        (
            "rust",
            DeclKind::Function,
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)",
        ),
        (
            "rust",
            DeclKind::Type,
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|type|union)\s+(\w+)",
        ),
        ("python", DeclKind::Function, r"^\s*(?:async\s+)?def\s+(\w+)"),
        ("python", DeclKind::Class, r"^\s*class\s+(\w+)"),
        (
            "js",
            DeclKind::Function,
            r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
        ),
        (
            "js",
            DeclKind::Function,
            r"^\s*(?:export\s+)?(?:const|let)\s+(\w+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::[^=]+)?=>",
        ),
        (
            "js",
            DeclKind::Class,
            r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(\w+)",
        ),
        (
            "js",
            DeclKind::Type,
            r"^\s*(?:export\s+)?(?:declare\s+)?(?:interface|type|enum)\s+(\w+)",
        ),
        ("go", DeclKind::Function, r"^func\s+(?:\([^)]*\)\s*)?(\w+)"),
        ("go", DeclKind::Type, r"^type\s+(\w+)\s+(?:struct|interface)"),
        (
            "java",
            DeclKind::Class,
            r"^\s*(?:(?:public|private|protected|internal|open|abstract|final|static|data|sealed)\s+)*(?:class|object)\s+(\w+)",
        ),
        (
            "java",
            DeclKind::Type,
            r"^\s*(?:(?:public|private|protected|internal|sealed)\s+)*(?:interface|enum|struct|protocol)\s+(\w+)",
        ),
        ("java", DeclKind::Function, r"^\s*(?:(?:public|private|protected|internal|override|suspend|static)\s+)*fun\s+(\w+)"),
        ("ruby", DeclKind::Function, r"^\s*def\s+(?:self\.)?(\w+[?!]?)"),
        ("ruby", DeclKind::Class, r"^\s*(?:class|module)\s+(\w+)"),
    ])
});

static IMPORTS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("js", r#"^\s*import\s+(?:[^'"]*?\s+from\s+)?['"]([^'"]+)['"]"#),
        ("js", r#"require\(\s*['"]([^'"]+)['"]\s*\)"#),
        ("js", r#"^\s*export\s+(?:\*|\{[^}]*\})\s+from\s+['"]([^'"]+)['"]"#),
        ("python", r"^\s*from\s+([\w.]+)\s+import\b"),
        ("python", r"^\s*import\s+([\w.]+)"),
        ("rust", r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([\w:]+)"),
        ("go", r#"^\s*(?:import\s+)?(?:\w+\s+)?"([\w./-]+)"\s*$"#),
        ("java", r"^\s*import\s+(?:static\s+)?([\w.]+)"),
        ("ruby", r#"^\s*require(?:_relative)?\s+['"]([^'"]+)['"]"#),
    ]
    .into_iter()
    .filter_map(|(family, pattern)| Regex::new(pattern).ok().map(|re| (family, re)))
    .collect()
});

static EXPORTS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "js",
            r"^\s*export\s+(?:default\s+)?(?:async\s+)?(?:function\s*\*?|class|const|let|var|interface|type|enum)\s+(\w+)",
        ),
        (
            "rust",
            r"^\s*pub\s+(?:async\s+)?(?:fn|struct|enum|trait|type|const|static|mod)\s+(\w+)",
        ),
    ]
    .into_iter()
    .filter_map(|(family, pattern)| Regex::new(pattern).ok().map(|re| (family, re)))
    .collect()
});

const CONFIG_FILE_NAMES: &[&str] = &[
    "package.json",
    "tsconfig.json",
    "cargo.toml",
    "pyproject.toml",
    "setup.cfg",
    "go.mod",
    "dockerfile",
    "makefile",
    ".env",
    ".gitignore",
    ".eslintrc",
    ".prettierrc",
];

const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "ini", "cfg", "conf", "env"];

/// Whether a path looks like a test file.
pub fn is_test_path(file_path: &str) -> bool {
    let lower = file_path.to_lowercase();
    let name = basename(&lower);
    lower.starts_with("test/")
        || lower.starts_with("tests/")
        || lower.contains("/test/")
        || lower.contains("/tests/")
        || lower.contains("__tests__")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.contains("_test.")
        || name.starts_with("test_")
}

/// Whether a path looks like a configuration file.
pub fn is_config_path(file_path: &str) -> bool {
    let lower = file_path.to_lowercase();
    let name = basename(&lower);
    if CONFIG_FILE_NAMES.contains(&name) || name.contains(".config.") || name.ends_with("rc") {
        return true;
    }
    name.rsplit_once('.')
        .map_or(false, |(_, ext)| CONFIG_EXTENSIONS.contains(&ext))
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

/// Extract metadata from a file. `language` overrides extension detection.
pub fn extract(file_path: &str, content: &str, language: Option<&str>) -> CodeMetadata {
    let language = language
        .map(str::to_lowercase)
        .or_else(|| detect_language(file_path).map(str::to_string));
    let mut meta = CodeMetadata {
        is_test_file: is_test_path(file_path),
        is_config_file: is_config_path(file_path),
        line_count: content.lines().count(),
        ..Default::default()
    };

    let Some(language) = language else {
        return meta;
    };
    let family = family(&language);

    for line in content.lines() {
        if is_comment(line) {
            continue;
        }
        for (f, kind, re) in DECLARATIONS.iter() {
            if *f != family {
                continue;
            }
            if let Some(name) = re.captures(line).and_then(|c| c.get(1)) {
                let target = match kind {
                    DeclKind::Function => &mut meta.functions,
                    DeclKind::Class => &mut meta.classes,
                    DeclKind::Type => &mut meta.types,
                };
                push_unique(target, name.as_str());
                break;
            }
        }
        for (f, re) in IMPORTS.iter().filter(|(f, _)| *f == family) {
            let _ = f;
            for caps in re.captures_iter(line) {
                if let Some(m) = caps.get(1) {
                    push_unique(&mut meta.imports, m.as_str());
                }
            }
        }
        for (_, re) in EXPORTS.iter().filter(|(f, _)| *f == family) {
            if let Some(name) = re.captures(line).and_then(|c| c.get(1)) {
                push_unique(&mut meta.exports, name.as_str());
            }
        }
    }

    meta
}
