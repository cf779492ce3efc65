use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result};
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::runtime::ResolvedPaths;

/// ACL rules carrying this role name apply to every role.
pub const WILDCARD_ROLE: &str = "ALL";

/// Pages without a matching rule are readable.
pub const DEFAULT_PERMISSION: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRule {
    pub pattern: String,
    pub permission: i32,
}

/// A visibility group. The role name never leaves the process; export
/// documents only ever carry the salted hash.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub usergroup_hash: String,
    pub rules: Vec<AclRule>,
}

impl Role {
    pub fn new(name: String, salt: &str, acl_text: &str) -> Self {
        let usergroup_hash = usergroup_hash(&name, salt);
        let rules = parse_rules(&name, acl_text);
        Self {
            name,
            usergroup_hash,
            rules,
        }
    }

    /// Applies the role's rules to a page path in file order; the permission
    /// of the last matching rule wins, regardless of how specific earlier
    /// matches were.
    pub fn can_access(&self, page_path: &str) -> bool {
        let mut permission = DEFAULT_PERMISSION;
        for rule in &self.rules {
            if glob_match(&rule.pattern, page_path) {
                permission = rule.permission;
            }
        }
        permission > 0
    }
}

/// Reads the user and ACL configuration from the store and builds the role
/// set. Both files are required; a store without them is inconsistent.
pub fn discover_roles(paths: &ResolvedPaths, salt: &str) -> Result<Vec<Role>> {
    let users_text = fs::read_to_string(&paths.users_path)
        .with_context(|| format!("failed to read {}", paths.users_path.display()))?;
    let acl_text = fs::read_to_string(&paths.acl_path)
        .with_context(|| format!("failed to read {}", paths.acl_path.display()))?;
    Ok(roles_from_sources(&users_text, &acl_text, salt))
}

pub fn roles_from_sources(users_text: &str, acl_text: &str, salt: &str) -> Vec<Role> {
    parse_role_names(users_text)
        .into_iter()
        .map(|name| Role::new(name, salt, acl_text))
        .collect()
}

/// Collects the distinct role names from the user list: field 5 of each
/// well-formed line is a comma-separated group list. Lines with a different
/// field count are skipped.
pub fn parse_role_names(users_text: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for line in users_text.lines() {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() != 5 {
            continue;
        }
        for token in parts[4].split(',') {
            let token = token.trim();
            if !token.is_empty() {
                names.insert(token.to_string());
            }
        }
    }
    names
}

/// The opaque identifier for a role: lowercase hex SHA-512 of name + salt.
pub fn usergroup_hash(name: &str, salt: &str) -> String {
    let digest = Sha512::digest(format!("{name}{salt}").as_bytes());
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// The restriction set for a page: `None` when every role can access it,
/// otherwise exactly the accessible roles' hashes in role order.
pub fn visible_groups<'a>(roles: &'a [Role], page_path: &str) -> Option<Vec<&'a str>> {
    let accessible: Vec<&str> = roles
        .iter()
        .filter(|role| role.can_access(page_path))
        .map(|role| role.usergroup_hash.as_str())
        .collect();
    if accessible.len() == roles.len() {
        None
    } else {
        Some(accessible)
    }
}

/// Matches a path against an ACL pattern. `*` matches any run of characters
/// including the path separator, `?` matches exactly one character, and
/// everything else is literal; there are no character classes.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let path: Vec<char> = path.chars().collect();
    let mut p = 0;
    let mut t = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while t < path.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == path[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Rules for one role, in ACL file order. A rule applies when its role
/// column (minus the `@` prefix) names the role or the wildcard role.
fn parse_rules(role_name: &str, acl_text: &str) -> Vec<AclRule> {
    let mut rules = Vec::new();
    for line in acl_text.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 3 {
            if !line.trim().is_empty() {
                debug!(line, "skipping non-standard acl line");
            }
            continue;
        }
        let Some(target) = parts[1].strip_prefix('@') else {
            debug!(line, "skipping acl line without @-prefixed role");
            continue;
        };
        if target != role_name && target != WILDCARD_ROLE {
            continue;
        }
        let Ok(permission) = parts[2].trim().parse::<i32>() else {
            debug!(line, "skipping acl line with unparseable permission");
            continue;
        };
        rules.push(AclRule {
            pattern: parts[0].to_string(),
            permission,
        });
    }
    rules
}
