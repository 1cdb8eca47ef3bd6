// SPDX-License-Identifier: Apache-2.0

//! Source rewriting (§4.5 step 1): library package paths are namespaced
//! per-template so libraries from different templates cannot collide, and
//! `data.*`/`input.*` references are checked against the extern whitelist.

use once_cell::sync::Lazy;
use regex::Regex;
use warden_core::error::Error;

static PACKAGE_DECL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^package\s+([A-Za-z0-9_.]+)\s*$").unwrap());
static IMPORT_INPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^import\s+input(\.[A-Za-z0-9_.]*)?\s*$").unwrap());
static DATA_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"data\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)").unwrap());

/// The required package name for a template's entry module (§4.5 step 4:
/// results are bound at `hooks.violation[result]`).
pub const ENTRY_PACKAGE: &str = "hooks";

/// Externs every template may reference regardless of `allowed_externs`: the
/// driver itself writes each constraint's parameters to `data.constraints`
/// (§4.1, §4.5 step 3), so a template reading its own parameters back is
/// never an undeclared extern.
const ALWAYS_ALLOWED_EXTERNS: &[&str] = &["constraints"];

/// One library source, paired with its declared package path.
pub struct Library {
    /// The library's raw source text.
    pub source: String,
}

/// The rewritten sources of a compiled template, ready to hand to the
/// engine.
pub struct RewrittenSource {
    /// The entry module, with `data.<lib>` references rewritten to their
    /// namespaced paths.
    pub entry: String,
    /// Namespaced library sources, in the same order as the input.
    pub libs: Vec<String>,
}

/// Rewrites `entry` and `libs` so that library package paths are namespaced
/// under `prefix`, validates that every remaining `data.*` reference is
/// either one of those namespaced paths or appears in `allowed_externs`, and
/// rejects `import input...` statements.
pub fn rewrite(kind: &str, entry: &str, libs: &[Library], prefix: &str, allowed_externs: &[String]) -> Result<RewrittenSource, Error> {
    if IMPORT_INPUT.is_match(entry) || libs.iter().any(|lib| IMPORT_INPUT.is_match(&lib.source)) {
        return Err(Error::InvalidConstraintTemplate {
            kind: kind.to_owned(),
            reason: "import of input.* is not allowed".to_owned(),
        });
    }

    let entry_package = PACKAGE_DECL
        .captures(entry)
        .map(|c| c[1].to_owned())
        .ok_or_else(|| Error::InvalidConstraintTemplate {
            kind: kind.to_owned(),
            reason: "entry module declares no package".to_owned(),
        })?;
    if entry_package != ENTRY_PACKAGE {
        return Err(Error::InvalidConstraintTemplate {
            kind: kind.to_owned(),
            reason: format!("entry module must declare 'package {ENTRY_PACKAGE}', found '{entry_package}'"),
        });
    }

    let mut renames = Vec::new();
    let mut rewritten_libs = Vec::with_capacity(libs.len());
    for lib in libs {
        let original = PACKAGE_DECL
            .captures(&lib.source)
            .map(|c| c[1].to_owned())
            .ok_or_else(|| Error::InvalidConstraintTemplate {
                kind: kind.to_owned(),
                reason: "library module declares no package".to_owned(),
            })?;
        let namespaced = format!("{prefix}_{}", original.replace('.', "_"));
        let rewritten_source = PACKAGE_DECL
            .replace(&lib.source, format!("package {namespaced}"))
            .into_owned();
        renames.push((original, namespaced));
        rewritten_libs.push(rewritten_source);
    }

    let rewrite_data_refs = |source: &str| -> String {
        DATA_REF
            .replace_all(source, |caps: &regex::Captures<'_>| {
                let referenced = &caps[1];
                for (original, namespaced) in &renames {
                    if referenced == original || referenced.starts_with(&format!("{original}.")) {
                        let suffix = &referenced[original.len()..];
                        return format!("data.{namespaced}{suffix}");
                    }
                }
                caps[0].to_owned()
            })
            .into_owned()
    };

    let rewritten_entry = rewrite_data_refs(entry);
    let rewritten_libs: Vec<String> = rewritten_libs.iter().map(|s| rewrite_data_refs(s)).collect();

    for source in std::iter::once(&rewritten_entry).chain(rewritten_libs.iter()) {
        for caps in DATA_REF.captures_iter(source) {
            let referenced = &caps[1];
            let is_namespaced_lib = renames.iter().any(|(_, namespaced)| {
                referenced == namespaced || referenced.starts_with(&format!("{namespaced}."))
            });
            let is_allowed_extern = allowed_externs
                .iter()
                .map(String::as_str)
                .chain(ALWAYS_ALLOWED_EXTERNS.iter().copied())
                .any(|allowed| referenced == allowed || referenced.starts_with(&format!("{allowed}.")));
            if !is_namespaced_lib && !is_allowed_extern {
                return Err(Error::InvalidConstraintTemplate {
                    kind: kind.to_owned(),
                    reason: format!("reference to undeclared extern 'data.{referenced}'"),
                });
            }
        }
    }

    Ok(RewrittenSource { entry: rewritten_entry, libs: rewritten_libs })
}
