//! Access control.
//!
//! Users carry an ordered rule list (categories and individual commands,
//! each allowing or denying), glob patterns for keys and channels, and a set
//! of SHA-256 password digests. Authorization folds the rule list in order,
//! so later rules override earlier ones, the way ACL SETUSER applies its
//! arguments left to right.

use std::collections::HashMap;

use globset::{Glob, GlobMatcher};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AclError {
    #[error("Error in ACL SETUSER modifier '{0}': Syntax error")]
    InvalidRule(String),
    #[error("The 'default' user cannot be removed")]
    CannotRemoveDefault,
    #[error("No such user '{0}'")]
    NoSuchUser(String),
}

/// The fixed command-category enumeration. Each command in the registry is
/// stamped with a bitmask of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclCategory {
    Read,
    Write,
    Keyspace,
    String,
    List,
    Set,
    SortedSet,
    Hash,
    Stream,
    Bitmap,
    Pubsub,
    Admin,
    Fast,
    Slow,
    Blocking,
    Connection,
    Transaction,
    Dangerous,
}

impl AclCategory {
    pub const ALL: &'static [AclCategory] = &[
        AclCategory::Read,
        AclCategory::Write,
        AclCategory::Keyspace,
        AclCategory::String,
        AclCategory::List,
        AclCategory::Set,
        AclCategory::SortedSet,
        AclCategory::Hash,
        AclCategory::Stream,
        AclCategory::Bitmap,
        AclCategory::Pubsub,
        AclCategory::Admin,
        AclCategory::Fast,
        AclCategory::Slow,
        AclCategory::Blocking,
        AclCategory::Connection,
        AclCategory::Transaction,
        AclCategory::Dangerous,
    ];

    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn name(self) -> &'static str {
        match self {
            AclCategory::Read => "read",
            AclCategory::Write => "write",
            AclCategory::Keyspace => "keyspace",
            AclCategory::String => "string",
            AclCategory::List => "list",
            AclCategory::Set => "set",
            AclCategory::SortedSet => "sortedset",
            AclCategory::Hash => "hash",
            AclCategory::Stream => "stream",
            AclCategory::Bitmap => "bitmap",
            AclCategory::Pubsub => "pubsub",
            AclCategory::Admin => "admin",
            AclCategory::Fast => "fast",
            AclCategory::Slow => "slow",
            AclCategory::Blocking => "blocking",
            AclCategory::Connection => "connection",
            AclCategory::Transaction => "transaction",
            AclCategory::Dangerous => "dangerous",
        }
    }

    pub fn parse(name: &str) -> Option<AclCategory> {
        AclCategory::ALL
            .iter()
            .copied()
            .find(|category| category.name() == name.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CommandRule {
    AllCommands { allow: bool },
    Category { category: AclCategory, allow: bool },
    Command { name: String, allow: bool },
}

impl CommandRule {
    fn render(&self) -> String {
        match self {
            CommandRule::AllCommands { allow } => {
                format!("{}@all", if *allow { "+" } else { "-" })
            }
            CommandRule::Category { category, allow } => {
                format!("{}@{}", if *allow { "+" } else { "-" }, category.name())
            }
            CommandRule::Command { name, allow } => {
                format!("{}{}", if *allow { "+" } else { "-" }, name)
            }
        }
    }
}

#[derive(Debug)]
struct Pattern {
    raw: String,
    matcher: GlobMatcher,
}

impl Pattern {
    fn compile(raw: &str) -> Result<Pattern, AclError> {
        let glob = Glob::new(raw).map_err(|_| AclError::InvalidRule(raw.to_string()))?;
        Ok(Pattern {
            raw: raw.to_string(),
            matcher: glob.compile_matcher(),
        })
    }
}

#[derive(Debug)]
pub struct AclUser {
    pub name: String,
    pub enabled: bool,
    pub nopass: bool,
    password_hashes: Vec<String>,
    rules: Vec<CommandRule>,
    key_patterns: Vec<Pattern>,
    channel_patterns: Vec<Pattern>,
}

impl AclUser {
    pub fn new(name: &str) -> Self {
        AclUser {
            name: name.to_string(),
            enabled: false,
            nopass: false,
            password_hashes: Vec::new(),
            rules: Vec::new(),
            key_patterns: Vec::new(),
            channel_patterns: Vec::new(),
        }
    }

    /// The implicit superuser every server starts with.
    pub fn default_user() -> Self {
        let mut user = AclUser::new("default");
        user.enabled = true;
        user.nopass = true;
        user.rules.push(CommandRule::AllCommands { allow: true });
        user.key_patterns.push(
            Pattern::compile("*").expect("the wildcard pattern compiles"),
        );
        user.channel_patterns.push(
            Pattern::compile("*").expect("the wildcard pattern compiles"),
        );
        user
    }

    /// Applies one ACL SETUSER modifier.
    pub fn apply_rule(&mut self, rule: &str) -> Result<(), AclError> {
        match rule {
            "on" => self.enabled = true,
            "off" => self.enabled = false,
            "nopass" => {
                self.nopass = true;
                self.password_hashes.clear();
            }
            "resetpass" => {
                self.nopass = false;
                self.password_hashes.clear();
            }
            "allcommands" => self.rules.push(CommandRule::AllCommands { allow: true }),
            "nocommands" => self.rules.push(CommandRule::AllCommands { allow: false }),
            "allkeys" => {
                self.key_patterns = vec![Pattern::compile("*")?];
            }
            "resetkeys" => self.key_patterns.clear(),
            "allchannels" => {
                self.channel_patterns = vec![Pattern::compile("*")?];
            }
            "resetchannels" => self.channel_patterns.clear(),
            "reset" => {
                *self = AclUser::new(&self.name);
            }
            _ => {
                if let Some(password) = rule.strip_prefix('>') {
                    self.nopass = false;
                    let digest = hash_password(password);
                    if !self.password_hashes.contains(&digest) {
                        self.password_hashes.push(digest);
                    }
                } else if let Some(password) = rule.strip_prefix('<') {
                    let digest = hash_password(password);
                    self.password_hashes.retain(|hash| *hash != digest);
                } else if let Some(digest) = rule.strip_prefix('#') {
                    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err(AclError::InvalidRule(rule.to_string()));
                    }
                    self.nopass = false;
                    self.password_hashes.push(digest.to_lowercase());
                } else if let Some(pattern) = rule.strip_prefix('~') {
                    self.key_patterns.push(Pattern::compile(pattern)?);
                } else if let Some(pattern) = rule.strip_prefix('&') {
                    self.channel_patterns.push(Pattern::compile(pattern)?);
                } else if let Some(category) = rule.strip_prefix("+@") {
                    if category.eq_ignore_ascii_case("all") {
                        self.rules.push(CommandRule::AllCommands { allow: true });
                    } else {
                        let category = AclCategory::parse(category)
                            .ok_or_else(|| AclError::InvalidRule(rule.to_string()))?;
                        self.rules.push(CommandRule::Category {
                            category,
                            allow: true,
                        });
                    }
                } else if let Some(category) = rule.strip_prefix("-@") {
                    if category.eq_ignore_ascii_case("all") {
                        self.rules.push(CommandRule::AllCommands { allow: false });
                    } else {
                        let category = AclCategory::parse(category)
                            .ok_or_else(|| AclError::InvalidRule(rule.to_string()))?;
                        self.rules.push(CommandRule::Category {
                            category,
                            allow: false,
                        });
                    }
                } else if let Some(name) = rule.strip_prefix('+') {
                    self.rules.push(CommandRule::Command {
                        name: name.to_lowercase(),
                        allow: true,
                    });
                } else if let Some(name) = rule.strip_prefix('-') {
                    self.rules.push(CommandRule::Command {
                        name: name.to_lowercase(),
                        allow: false,
                    });
                } else {
                    return Err(AclError::InvalidRule(rule.to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn check_password(&self, password: &str) -> bool {
        if self.nopass {
            return true;
        }
        let digest = hash_password(password);
        self.password_hashes.contains(&digest)
    }

    /// Folds the rule list in order: the last matching rule decides.
    pub fn can_run(&self, command_name: &str, categories: u32) -> bool {
        let name = command_name.to_lowercase();
        let mut allowed = false;

        for rule in &self.rules {
            match rule {
                CommandRule::AllCommands { allow } => allowed = *allow,
                CommandRule::Category { category, allow } => {
                    if categories & category.bit() != 0 {
                        allowed = *allow;
                    }
                }
                CommandRule::Command {
                    name: rule_name,
                    allow,
                } => {
                    if *rule_name == name {
                        allowed = *allow;
                    }
                }
            }
        }

        allowed
    }

    pub fn can_access_key(&self, key: &[u8]) -> bool {
        let Ok(key) = std::str::from_utf8(key) else {
            // Patterns are textual; a non-UTF-8 key only matches `*`.
            return self.key_patterns.iter().any(|pattern| pattern.raw == "*");
        };
        self.key_patterns
            .iter()
            .any(|pattern| pattern.matcher.is_match(key))
    }

    pub fn can_access_channel(&self, channel: &[u8]) -> bool {
        let Ok(channel) = std::str::from_utf8(channel) else {
            return self
                .channel_patterns
                .iter()
                .any(|pattern| pattern.raw == "*");
        };
        self.channel_patterns
            .iter()
            .any(|pattern| pattern.matcher.is_match(channel))
    }

    /// Rendering for ACL GETUSER / ACL LIST.
    pub fn describe(&self) -> Vec<String> {
        let mut parts = vec![if self.enabled { "on" } else { "off" }.to_string()];

        if self.nopass {
            parts.push("nopass".to_string());
        }
        for hash in &self.password_hashes {
            parts.push(format!("#{}", hash));
        }
        for pattern in &self.key_patterns {
            parts.push(format!("~{}", pattern.raw));
        }
        for pattern in &self.channel_patterns {
            parts.push(format!("&{}", pattern.raw));
        }
        for rule in &self.rules {
            parts.push(rule.render());
        }

        parts
    }
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub struct AclTable {
    users: HashMap<String, AclUser>,
}

impl Default for AclTable {
    fn default() -> Self {
        let mut users = HashMap::new();
        users.insert("default".to_string(), AclUser::default_user());
        AclTable { users }
    }
}

impl AclTable {
    pub fn new() -> Self {
        AclTable::default()
    }

    pub fn user(&self, name: &str) -> Option<&AclUser> {
        self.users.get(name)
    }

    pub fn user_mut(&mut self, name: &str) -> &mut AclUser {
        self.users
            .entry(name.to_string())
            .or_insert_with(|| AclUser::new(name))
    }

    pub fn delete(&mut self, name: &str) -> Result<bool, AclError> {
        if name == "default" {
            return Err(AclError::CannotRemoveDefault);
        }
        Ok(self.users.remove(name).is_some())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn users(&self) -> impl Iterator<Item = &AclUser> {
        self.users.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_category() -> u32 {
        AclCategory::Read.bit()
    }

    #[test]
    fn test_default_user_allows_everything() {
        let user = AclUser::default_user();
        assert!(user.enabled);
        assert!(user.check_password("anything"));
        assert!(user.can_run("GET", read_category()));
        assert!(user.can_access_key(b"any:key"));
        assert!(user.can_access_channel(b"any.channel"));
    }

    #[test]
    fn test_explicit_command_deny_overrides_category_allow() {
        let mut user = AclUser::new("limited");
        user.apply_rule("on").unwrap();
        user.apply_rule("+@all").unwrap();
        user.apply_rule("-get").unwrap();

        assert!(!user.can_run("GET", read_category()));
        assert!(user.can_run("SET", AclCategory::Write.bit()));
    }

    #[test]
    fn test_category_allow_with_key_pattern() {
        let mut user = AclUser::new("reader");
        user.apply_rule("on").unwrap();
        user.apply_rule("+@read").unwrap();
        user.apply_rule("~foo:*").unwrap();

        assert!(user.can_run("GET", read_category()));
        assert!(!user.can_run("SET", AclCategory::Write.bit()));
        assert!(user.can_access_key(b"foo:bar"));
        assert!(!user.can_access_key(b"bar:baz"));
    }

    #[test]
    fn test_rule_order_matters() {
        let mut user = AclUser::new("flip");
        user.apply_rule("+get").unwrap();
        user.apply_rule("-@read").unwrap();
        assert!(!user.can_run("GET", read_category()));

        let mut user = AclUser::new("flop");
        user.apply_rule("-@read").unwrap();
        user.apply_rule("+get").unwrap();
        assert!(user.can_run("GET", read_category()));
    }

    #[test]
    fn test_passwords() {
        let mut user = AclUser::new("secure");
        user.apply_rule(">hunter2").unwrap();

        assert!(user.check_password("hunter2"));
        assert!(!user.check_password("wrong"));
        assert!(!user.nopass);

        user.apply_rule("<hunter2").unwrap();
        assert!(!user.check_password("hunter2"));

        user.apply_rule("nopass").unwrap();
        assert!(user.check_password("anything"));
    }

    #[test]
    fn test_password_digest_rule() {
        let digest = hash_password("s3cret");
        let mut user = AclUser::new("digested");
        user.apply_rule(&format!("#{}", digest)).unwrap();
        assert!(user.check_password("s3cret"));

        assert_eq!(
            user.apply_rule("#nothex"),
            Err(AclError::InvalidRule("#nothex".to_string()))
        );
    }

    #[test]
    fn test_invalid_rules() {
        let mut user = AclUser::new("broken");
        assert!(user.apply_rule("frobnicate").is_err());
        assert!(user.apply_rule("+@nonsense").is_err());
    }

    #[test]
    fn test_table_protects_default() {
        let mut table = AclTable::new();
        assert_eq!(table.delete("default"), Err(AclError::CannotRemoveDefault));

        table.user_mut("worker").apply_rule("on").unwrap();
        assert_eq!(table.delete("worker"), Ok(true));
        assert_eq!(table.delete("worker"), Ok(false));
    }

    #[test]
    fn test_describe_round_trips_the_shape() {
        let mut user = AclUser::new("shaped");
        user.apply_rule("on").unwrap();
        user.apply_rule(">pw").unwrap();
        user.apply_rule("~app:*").unwrap();
        user.apply_rule("&events.*").unwrap();
        user.apply_rule("+@read").unwrap();
        user.apply_rule("-get").unwrap();

        let described = user.describe();
        assert_eq!(described[0], "on");
        assert!(described.contains(&format!("#{}", hash_password("pw"))));
        assert!(described.contains(&"~app:*".to_string()));
        assert!(described.contains(&"&events.*".to_string()));
        assert!(described.contains(&"+@read".to_string()));
        assert!(described.contains(&"-get".to_string()));
    }
}
