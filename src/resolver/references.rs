// Lightweight per-language reference scans (imports, includes, module declarations)

use once_cell::sync::Lazy;
use regex::Regex;

use crate::grammar::Language;

static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]+as[ \t]+\w+)?(?:[ \t]*,[ \t]*[\w.]+(?:[ \t]+as[ \t]+\w+)?)*)").expect("reference pattern compiles"));
static PY_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*from[ \t]+(\.*)([\w.]*)[ \t]+import[ \t]+\(?[ \t]*([\w, \t]+)").expect("reference pattern compiles"));
static C_INCLUDE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*[<"]([^>"\n]+)[>"]"#).expect("reference pattern compiles"));
static RUST_MOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?mod[ \t]+(\w+)[ \t]*;").expect("reference pattern compiles"));
static RUST_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?use[ \t]+((?:\w+::)*\w+)").expect("reference pattern compiles"));
static JAVA_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]+(static[ \t]+)?([\w.]+?)(\.\*)?[ \t]*;").expect("reference pattern compiles"));

/// Crates that never live in the provided file set.
const RUST_EXTERN_ROOTS: &[&str] = &["std", "core", "alloc"];

/// What to try when none of a reference's candidate paths exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    None,
    /// The unique file whose name without extension matches.
    Stem(String),
    /// The unique file whose final path component matches.
    FileName(String),
    /// Every file directly inside a directory (java wildcard imports).
    Package(String),
}

/// One declared reference found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// As written in the source.
    pub text: String,
    pub line: u32,
    /// Full paths to try, in priority order.
    pub candidates: Vec<String>,
    pub fallback: Fallback,
}

/// Extract the references a file declares. Never fails; text that does not
/// look like a reference is ignored.
pub fn scan(language: Language, path: &str, content: &str) -> Vec<Reference> {
    let dir = parent_dir(path);
    let mut refs = Vec::new();

    match language {
        Language::Python => {
            for caps in PY_IMPORT.captures_iter(content) {
                let line = line_at(content, caps.get(0).map_or(0, |m| m.start()));
                for item in caps[1].split(',') {
                    let module = item.split_whitespace().next().unwrap_or("");
                    if !module.is_empty() {
                        refs.push(python_module(dir, module, line));
                    }
                }
            }
            for caps in PY_FROM.captures_iter(content) {
                let line = line_at(content, caps.get(0).map_or(0, |m| m.start()));
                let dots = caps[1].len();
                let module = &caps[2];
                if dots == 0 {
                    refs.push(python_module(dir, module, line));
                    continue;
                }

                let mut base = dir.to_string();
                for _ in 1..dots {
                    base = parent_dir(&base).to_string();
                }
                if module.is_empty() {
                    // `from . import a, b` names sibling modules
                    for name in caps[3].split(',') {
                        let name = name.split_whitespace().next().unwrap_or("");
                        if !name.is_empty() {
                            refs.push(Reference {
                                text: format!("{}{}", &caps[1], name),
                                line,
                                candidates: python_candidates(&join(&base, name)),
                                fallback: Fallback::None,
                            });
                        }
                    }
                } else {
                    let rel = module.replace('.', "/");
                    refs.push(Reference {
                        text: format!("{}{}", &caps[1], module),
                        line,
                        candidates: python_candidates(&join(&base, &rel)),
                        fallback: Fallback::None,
                    });
                }
            }
        }
        Language::C | Language::Cpp => {
            for caps in C_INCLUDE.captures_iter(content) {
                let line = line_at(content, caps.get(0).map_or(0, |m| m.start()));
                let header = caps[1].trim();
                let file_name = header.rsplit('/').next().unwrap_or(header);
                refs.push(Reference {
                    text: header.to_string(),
                    line,
                    candidates: dedup(vec![join(dir, header), normalize(header)]),
                    fallback: Fallback::FileName(file_name.to_string()),
                });
            }
        }
        Language::Rust => {
            let stem = file_stem(path);
            let module_dir = if matches!(stem, "main" | "lib" | "mod") {
                dir.to_string()
            } else {
                join(dir, stem)
            };
            for caps in RUST_MOD.captures_iter(content) {
                let line = line_at(content, caps.get(0).map_or(0, |m| m.start()));
                let name = &caps[1];
                refs.push(Reference {
                    text: format!("mod {}", name),
                    line,
                    candidates: vec![
                        join(&module_dir, &format!("{}.rs", name)),
                        join(&module_dir, &format!("{}/mod.rs", name)),
                    ],
                    fallback: Fallback::Stem(name.to_string()),
                });
            }
            for caps in RUST_USE.captures_iter(content) {
                let line = line_at(content, caps.get(0).map_or(0, |m| m.start()));
                if let Some(reference) = rust_use(dir, &caps[1], line) {
                    refs.push(reference);
                }
            }
        }
        Language::Java => {
            for caps in JAVA_IMPORT.captures_iter(content) {
                let line = line_at(content, caps.get(0).map_or(0, |m| m.start()));
                let is_static = caps.get(1).is_some();
                let wildcard = caps.get(3).is_some();
                let mut segments: Vec<&str> = caps[2].split('.').collect();
                if is_static && !wildcard {
                    segments.pop();
                }
                let Some(last) = segments.last().copied() else {
                    continue;
                };
                let rel = segments.join("/");
                let text = format!("{}{}", &caps[2], if wildcard { ".*" } else { "" });
                if wildcard && !is_static {
                    refs.push(Reference {
                        text,
                        line,
                        candidates: Vec::new(),
                        fallback: Fallback::Package(rel),
                    });
                } else {
                    refs.push(Reference {
                        text,
                        line,
                        candidates: dedup(vec![
                            normalize(&format!("{}.java", rel)),
                            join(dir, &format!("{}.java", last)),
                        ]),
                        fallback: Fallback::Stem(last.to_string()),
                    });
                }
            }
        }
    }

    refs
}

fn python_module(dir: &str, module: &str, line: u32) -> Reference {
    let rel = module.replace('.', "/");
    let mut candidates = python_candidates(&join(dir, &rel));
    candidates.extend(python_candidates(&normalize(&rel)));
    let last = module.rsplit('.').next().unwrap_or(module);
    Reference {
        text: module.to_string(),
        line,
        candidates: dedup(candidates),
        fallback: Fallback::Stem(last.to_string()),
    }
}

fn python_candidates(base: &str) -> Vec<String> {
    vec![
        format!("{}.py", base),
        format!("{}/__init__.py", base),
        base.to_string(),
    ]
}

fn rust_use(dir: &str, path: &str, line: u32) -> Option<Reference> {
    let mut segments: Vec<&str> = path.split("::").collect();
    let mut base = dir.to_string();
    let mut anchored = false;
    while let Some(first) = segments.first().copied() {
        match first {
            "crate" => {
                base = String::new();
                anchored = true;
            }
            "self" => anchored = true,
            "super" => {
                base = parent_dir(&base).to_string();
                anchored = true;
            }
            _ => break,
        }
        segments.remove(0);
    }

    // `use crate::helper;` names an item, not a module
    let module = *segments.first()?;
    if !anchored && RUST_EXTERN_ROOTS.contains(&module) {
        return None;
    }
    if anchored && segments.len() < 2 && base.is_empty() && module.chars().next()?.is_uppercase() {
        return None;
    }

    let mut candidates = vec![
        join(&base, &format!("{}.rs", module)),
        join(&base, &format!("{}/mod.rs", module)),
    ];
    if base.is_empty() {
        candidates.push(format!("src/{}.rs", module));
        candidates.push(format!("src/{}/mod.rs", module));
    }
    Some(Reference {
        text: path.to_string(),
        line,
        candidates: dedup(candidates),
        fallback: Fallback::Stem(module.to_string()),
    })
}

/// 1-based line of a byte offset.
pub fn line_at(content: &str, offset: usize) -> u32 {
    let offset = offset.min(content.len());
    content.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() as u32 + 1
}

/// Directory part of a normalized path, `""` for the root.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// File name without its extension.
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split_once('.').map_or(name, |(stem, _)| stem)
}

/// Join a relative reference onto a directory, folding `.` and `..`.
pub fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        normalize(rel)
    } else {
        normalize(&format!("{}/{}", dir, rel))
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn dedup(mut candidates: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_imports() {
        let src = "import os, utils as u\nfrom pkg.mod import thing\nfrom . import sibling\n";
        let refs = scan(Language::Python, "app/main.py", src);
        let texts: Vec<_> = refs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["os", "utils", "pkg.mod", ".sibling"]);
        assert_eq!(refs[1].candidates[0], "app/utils.py");
        assert!(refs[1].candidates.contains(&"utils.py".to_string()));
        assert_eq!(refs[2].line, 2);
        assert_eq!(refs[3].candidates[0], "app/sibling.py");
    }

    #[test]
    fn test_relative_parent_import() {
        let refs = scan(Language::Python, "a/b/c.py", "from ..shared import x\n");
        assert_eq!(refs[0].candidates[0], "a/shared.py");
    }

    #[test]
    fn test_c_includes() {
        let refs = scan(Language::C, "src/main.c", "#include <stdio.h>\n#include \"util/math.h\"\n");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].candidates, vec!["src/util/math.h", "util/math.h"]);
        assert_eq!(refs[1].fallback, Fallback::FileName("math.h".into()));
    }

    #[test]
    fn test_rust_mod_and_use() {
        let src = "mod shapes;\nuse crate::utils::helper;\nuse std::fmt;\n";
        let refs = scan(Language::Rust, "src/main.rs", src);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].candidates, vec!["src/shapes.rs", "src/shapes/mod.rs"]);
        assert!(refs[1].candidates.contains(&"src/utils.rs".to_string()));

        let nested = scan(Language::Rust, "src/geo.rs", "mod point;\n");
        assert_eq!(nested[0].candidates[0], "src/geo/point.rs");
    }

    #[test]
    fn test_java_imports() {
        let src = "import com.acme.Utils;\nimport static com.acme.Math.max;\nimport java.util.*;\n";
        let refs = scan(Language::Java, "Main.java", src);
        assert_eq!(refs[0].candidates[0], "com/acme/Utils.java");
        assert_eq!(refs[1].fallback, Fallback::Stem("Math".into()));
        assert_eq!(refs[2].fallback, Fallback::Package("java/util".into()));
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(join("a/b", "../c.py"), "a/c.py");
        assert_eq!(parent_dir("main.py"), "");
        assert_eq!(file_stem("pkg/utils.py"), "utils");
        assert_eq!(line_at("a\nb\nc", 4), 3);
    }
}
