//! The shared credentials file, viewed as a store of named profiles.
//!
//! Every operation reads the file from disk and every mutation rewrites it
//! before returning, so the file is the only state. Profiles owned by this
//! tool carry [`MANAGED_KEY`]. Mutations edit the file's lines in place, so
//! everything outside the touched section keeps its exact text, comments
//! included.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use configparser::ini::Ini;

pub const MANAGED_KEY: &str = "rolesync_managed";
pub const EXPIRATION_KEY: &str = "expire";
pub const ACCESS_KEY_ID_KEY: &str = "aws_access_key_id";
pub const SECRET_ACCESS_KEY_KEY: &str = "aws_secret_access_key";
pub const SESSION_TOKEN_KEY: &str = "aws_session_token";

// Keys above the first header belong to no profile, not to `[default]`.
const UNSECTIONED: &str = "rolesync:unsectioned";

const COMMENT_SYMBOLS: &[char] = &['#', ';'];
const DELIMITERS: &[char] = &['=', ':'];

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile {0} does not exist")]
    NotFound(String),

    #[error("profile {0} is not managed by rolesync")]
    NotManaged(String),

    #[error("profile {0} already exists")]
    AlreadyExists(String),

    #[error("profile {0} has no expiration")]
    NoExpiration(String),

    #[error("profile {name} has an unparsable expiration {value:?}")]
    UnparsableExpiration {
        name: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("key {key} not found in profile {name}")]
    KeyNotFound { name: String, key: String },

    #[error("unable to read credentials file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to parse credentials file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unable to save credentials file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub managed: bool,
    pub keys: BTreeMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// A profile without a readable expiration counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now >= expires_at)
    }
}

pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self, name: &str) -> Result<bool, ProfileError> {
        Ok(self.load()?.has_section(name))
    }

    pub fn profile(&self, name: &str) -> Result<Option<Profile>, ProfileError> {
        Ok(self.load()?.profile(name))
    }

    pub fn get_key(&self, name: &str, key: &str) -> Result<String, ProfileError> {
        let profile = self
            .profile(name)?
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))?;

        profile
            .keys
            .get(key)
            .cloned()
            .ok_or_else(|| ProfileError::KeyNotFound {
                name: name.to_string(),
                key: key.to_string(),
            })
    }

    /// Whether a managed profile has passed its expiration.
    ///
    /// Problems reading the expiration are returned rather than guessed at.
    pub fn is_expired(&self, name: &str) -> Result<bool, ProfileError> {
        let profile = self
            .profile(name)?
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))?;

        if !profile.managed {
            return Err(ProfileError::NotManaged(name.to_string()));
        }

        let value = profile
            .keys
            .get(EXPIRATION_KEY)
            .ok_or_else(|| ProfileError::NoExpiration(name.to_string()))?;

        let expires_at =
            parse_expiration(value).map_err(|source| ProfileError::UnparsableExpiration {
                name: name.to_string(),
                value: value.clone(),
                source,
            })?;

        Ok(Utc::now() >= expires_at)
    }

    /// Adds an empty profile marked as managed.
    pub fn create(&self, name: &str) -> Result<(), ProfileError> {
        let mut file = self.load()?;
        if file.has_section(name) {
            return Err(ProfileError::AlreadyExists(name.to_string()));
        }

        file.append_section(name);
        file.set(name, MANAGED_KEY, "true");
        self.save(&file)
    }

    pub fn set_key(&self, name: &str, key: &str, value: &str) -> Result<(), ProfileError> {
        self.set_keys(name, [(key, value)])
    }

    /// Sets several keys with a single rewrite of the file.
    pub fn set_keys<'a, I>(&self, name: &str, entries: I) -> Result<(), ProfileError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut file = self.load()?;
        if !file.has_section(name) {
            return Err(ProfileError::NotFound(name.to_string()));
        }

        for (key, value) in entries {
            file.set(name, key, value);
        }
        self.save(&file)
    }

    /// Removes a profile. Removing a missing profile is not an error.
    pub fn delete(&self, name: &str) -> Result<(), ProfileError> {
        let mut file = self.load()?;
        if !file.remove_section(name) {
            log::debug!("Profile {name} not present, nothing to delete");
            return Ok(());
        }
        self.save(&file)
    }

    pub fn list_managed_names(&self) -> Result<Vec<String>, ProfileError> {
        let file = self.load()?;

        let mut names = Vec::new();
        for section in file.section_names() {
            if file.is_managed(&section) {
                log::debug!("Profile {section} is managed");
                names.push(section);
            } else {
                log::debug!("Profile {section} is not managed, skipping");
            }
        }
        names.sort();

        Ok(names)
    }

    /// True when at least one managed profile is expired.
    pub fn any_managed_expired(&self) -> Result<bool, ProfileError> {
        let file = self.load()?;
        let now = Utc::now();

        Ok(file
            .section_names()
            .iter()
            .filter_map(|section| file.profile(section))
            .filter(|profile| profile.managed)
            .any(|profile| profile.is_expired_at(now)))
    }

    fn load(&self) -> Result<CredentialsFile, ProfileError> {
        if !self.path.exists() {
            log::debug!(
                "Credentials file not found, creating empty file: {}",
                self.path.display()
            );
            create_empty_file(&self.path).map_err(|source| ProfileError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        log::debug!("Loading credentials file: {}", self.path.display());
        let content = fs::read_to_string(&self.path).map_err(|source| ProfileError::Read {
            path: self.path.clone(),
            source,
        })?;

        CredentialsFile::parse(content).map_err(|message| ProfileError::Parse {
            path: self.path.clone(),
            message,
        })
    }

    /// Writes the whole file through a sibling temporary file and a rename,
    /// so readers see either the old or the new content.
    fn save(&self, file: &CredentialsFile) -> Result<(), ProfileError> {
        let write = || -> io::Result<()> {
            let dir = match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };

            let mut temp = tempfile::NamedTempFile::new_in(dir)?;
            temp.write_all(file.contents().as_bytes())?;
            temp.as_file().sync_all()?;
            temp.persist(&self.path).map_err(|e| e.error)?;
            Ok(())
        };

        write().map_err(|source| ProfileError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// The credentials file as found on disk: its lines verbatim, line endings
/// included, for rewriting, and the parsed sections for lookups.
struct CredentialsFile {
    lines: Vec<String>,
    ini: Ini,
}

impl CredentialsFile {
    fn parse(content: String) -> Result<Self, String> {
        let mut defaults = Ini::new_cs().defaults();
        defaults.default_section = UNSECTIONED.to_string();
        // `#` and `;` are legal inside values such as `credential_process`.
        defaults.enable_inline_comments = false;

        let mut ini = Ini::new_from_defaults(defaults);
        ini.read(content.clone())?;

        let lines = content.split_inclusive('\n').map(str::to_string).collect();
        Ok(Self { lines, ini })
    }

    fn contents(&self) -> String {
        self.lines.concat()
    }

    fn section_names(&self) -> Vec<String> {
        self.ini
            .sections()
            .into_iter()
            .filter(|section| section != UNSECTIONED)
            .collect()
    }

    fn has_section(&self, name: &str) -> bool {
        name != UNSECTIONED && self.ini.get_map_ref().contains_key(name)
    }

    fn is_managed(&self, name: &str) -> bool {
        self.ini
            .get_map_ref()
            .get(name)
            .is_some_and(|keys| keys.contains_key(MANAGED_KEY))
    }

    fn profile(&self, name: &str) -> Option<Profile> {
        if name == UNSECTIONED {
            return None;
        }
        let section = self.ini.get_map_ref().get(name)?;

        let keys = section
            .iter()
            .map(|(key, value)| (key.clone(), value.clone().unwrap_or_default()))
            .collect::<BTreeMap<_, _>>();

        let expires_at = keys
            .get(EXPIRATION_KEY)
            .and_then(|value| parse_expiration(value).ok());

        Some(Profile {
            name: name.to_string(),
            managed: keys.contains_key(MANAGED_KEY),
            keys,
            expires_at,
        })
    }

    /// Line ranges of every section headed `[name]`, header included. A
    /// section runs until the next header or the end of the file.
    fn section_ranges(&self, name: &str) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut start = None;

        for (index, line) in self.lines.iter().enumerate() {
            if let Some(header) = section_header(line) {
                if let Some(start) = start.take() {
                    ranges.push(start..index);
                }
                if header == name {
                    start = Some(index);
                }
            }
        }
        if let Some(start) = start {
            ranges.push(start..self.lines.len());
        }

        ranges
    }

    /// One past the last header or entry line of a section. Blank lines and
    /// comments after it usually describe whatever follows.
    fn end_of_entries(&self, range: &Range<usize>) -> usize {
        range
            .clone()
            .rev()
            .find(|&index| !is_blank_or_comment(&self.lines[index]))
            .map_or(range.start + 1, |index| index + 1)
    }

    fn append_section(&mut self, name: &str) {
        let separate = match self.lines.last_mut() {
            Some(last) => {
                if !last.ends_with('\n') {
                    last.push('\n');
                }
                !last.trim().is_empty()
            }
            None => false,
        };
        if separate {
            self.lines.push("\n".to_string());
        }
        self.lines.push(format!("[{name}]\n"));
    }

    /// Replaces every line holding `key` in the section, or adds one after
    /// its last entry.
    fn set(&mut self, name: &str, key: &str, value: &str) {
        let ranges = self.section_ranges(name);

        let mut replaced = false;
        for index in ranges.iter().cloned().flatten() {
            let line = &self.lines[index];
            if line_key(line) == Some(key) {
                let ending = line_ending(line);
                self.lines[index] = format!("{key} = {value}{ending}");
                replaced = true;
            }
        }

        if let (false, Some(range)) = (replaced, ranges.last()) {
            let at = self.end_of_entries(range);
            if !self.lines[at - 1].ends_with('\n') {
                self.lines[at - 1].push('\n');
            }
            self.lines.insert(at, format!("{key} = {value}\n"));
        }
    }

    /// Drops every section named `name`. Comments trailing a section stay in
    /// place, and a section at the end of the file takes the blank lines
    /// above it along. Returns whether anything was removed.
    fn remove_section(&mut self, name: &str) -> bool {
        let mut removed = false;

        while let Some(range) = self.section_ranges(name).pop() {
            let end = (self.end_of_entries(&range)..range.end)
                .find(|&index| is_comment(&self.lines[index]))
                .unwrap_or(range.end);

            let mut start = range.start;
            if end == self.lines.len() {
                while start > 0 && self.lines[start - 1].trim().is_empty() {
                    start -= 1;
                }
            }

            self.lines.drain(start..end);
            removed = true;
        }

        removed
    }
}

/// The name in a `[name]` header line, trimmed the way the parser trims it.
fn section_header(line: &str) -> Option<&str> {
    let line = line.trim().strip_prefix('[')?;
    let end = line.rfind(']')?;
    Some(line[..end].trim())
}

fn line_key(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(COMMENT_SYMBOLS) || line.starts_with('[') {
        return None;
    }

    Some(match line.find(DELIMITERS) {
        Some(index) => line[..index].trim(),
        None => line,
    })
}

fn line_ending(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with(COMMENT_SYMBOLS)
}

fn is_blank_or_comment(line: &str) -> bool {
    line.trim().is_empty() || is_comment(line)
}

fn parse_expiration(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|expires_at| expires_at.with_timezone(&Utc))
}

/// Creates the file (and its directory) readable by the owner only.
fn create_empty_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join(".aws").join("credentials"));
        (dir, store)
    }

    fn write(store: &ProfileStore, content: &str) {
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), content).unwrap();
    }

    #[test]
    fn creates_missing_file_with_owner_only_permissions() {
        let (_dir, store) = store();

        assert!(!store.exists("anything").unwrap());
        assert!(store.path().is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn create_marks_profile_managed() {
        let (_dir, store) = store();

        store.create("prod/Admin").unwrap();

        assert!(store.exists("prod/Admin").unwrap());
        let profile = store.profile("prod/Admin").unwrap().unwrap();
        assert!(profile.managed);
        assert_eq!(profile.keys.get(MANAGED_KEY).map(String::as_str), Some("true"));
        assert!(matches!(
            store.create("prod/Admin"),
            Err(ProfileError::AlreadyExists(name)) if name == "prod/Admin"
        ));
    }

    #[test]
    fn set_key_requires_existing_profile() {
        let (_dir, store) = store();

        assert!(matches!(
            store.set_key("missing", "region", "us-east-1"),
            Err(ProfileError::NotFound(_))
        ));

        store.create("dev/Admin").unwrap();
        store.set_key("dev/Admin", "region", "us-east-1").unwrap();
        assert_eq!(store.get_key("dev/Admin", "region").unwrap(), "us-east-1");
        assert!(matches!(
            store.get_key("dev/Admin", "output"),
            Err(ProfileError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.create("dev/Admin").unwrap();

        store.delete("dev/Admin").unwrap();
        store.delete("dev/Admin").unwrap();

        assert!(!store.exists("dev/Admin").unwrap());
    }

    #[test]
    fn lists_only_managed_profiles_sorted() {
        let (_dir, store) = store();
        write(
            &store,
            "[default]\naws_access_key_id=AKIDEFAULT\n\n\
             [zeta/Admin]\nrolesync_managed=true\n\n\
             [alpha/Admin]\nrolesync_managed=true\n\n\
             [personal]\nregion=us-east-1\n",
        );

        assert_eq!(store.list_managed_names().unwrap(), vec!["alpha/Admin", "zeta/Admin"]);
    }

    #[test]
    fn unmanaged_profiles_survive_rewrites() {
        let (_dir, store) = store();
        write(&store, "[default]\naws_access_key_id=AKIDEFAULT\nregion=us-east-1\n");

        store.create("prod/Admin").unwrap();
        store.delete("prod/Admin").unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("[default]"));
        assert_eq!(store.get_key("default", "aws_access_key_id").unwrap(), "AKIDEFAULT");
        assert!(!store.profile("default").unwrap().unwrap().managed);
    }

    #[test]
    fn comment_symbols_inside_values_are_kept() {
        let (_dir, store) = store();
        let original = "[personal]\n\
                        aws_secret_access_key=abc#def;ghi\n\
                        credential_process = sh -c \"a; b\"\n";
        write(&store, original);

        assert_eq!(
            store.get_key("personal", "aws_secret_access_key").unwrap(),
            "abc#def;ghi"
        );
        assert_eq!(
            store.get_key("personal", "credential_process").unwrap(),
            "sh -c \"a; b\""
        );

        store.create("x/Admin").unwrap();
        store.delete("x/Admin").unwrap();

        assert_eq!(fs::read_to_string(store.path()).unwrap(), original);
    }

    #[test]
    fn set_key_edits_section_in_place() {
        let (_dir, store) = store();
        write(
            &store,
            "[dev/Admin]\n; note\nrolesync_managed=true\nregion=eu-west-1\n\n\
             # hand made\n[personal]\nregion : us-west-2\n",
        );

        store.set_key("dev/Admin", "region", "us-east-1").unwrap();
        store.set_key("dev/Admin", "output", "json").unwrap();

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "[dev/Admin]\n; note\nrolesync_managed=true\nregion = us-east-1\noutput = json\n\n\
             # hand made\n[personal]\nregion : us-west-2\n"
        );
    }

    #[test]
    fn delete_keeps_comments_of_the_next_section() {
        let (_dir, store) = store();
        write(
            &store,
            "[dev/Admin]\nrolesync_managed=true\n\n\
             # hand made\n[personal]\nregion : us-west-2\n\n\
             [dev/Admin]\nexpire=never\n",
        );

        store.delete("dev/Admin").unwrap();

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "# hand made\n[personal]\nregion : us-west-2\n"
        );
        assert!(store.list_managed_names().unwrap().is_empty());
    }

    #[test]
    fn expiration_checks() {
        let (_dir, store) = store();
        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
        write(
            &store,
            &format!(
                "[valid]\nrolesync_managed=true\nexpire={future}\n\n\
                 [expired]\nrolesync_managed=true\nexpire={past}\n\n\
                 [no-expiry]\nrolesync_managed=true\n\n\
                 [garbled]\nrolesync_managed=true\nexpire=tomorrow\n\n\
                 [unmanaged]\nexpire={future}\n"
            ),
        );

        assert!(!store.is_expired("valid").unwrap());
        assert!(store.is_expired("expired").unwrap());
        assert!(matches!(store.is_expired("no-expiry"), Err(ProfileError::NoExpiration(_))));
        assert!(matches!(
            store.is_expired("garbled"),
            Err(ProfileError::UnparsableExpiration { .. })
        ));
        assert!(matches!(store.is_expired("unmanaged"), Err(ProfileError::NotManaged(_))));
        assert!(matches!(store.is_expired("missing"), Err(ProfileError::NotFound(_))));

        assert!(store.any_managed_expired().unwrap());
        let garbled = store.profile("garbled").unwrap().unwrap();
        assert!(garbled.expires_at.is_none());
        assert!(garbled.is_expired_at(Utc::now()));
    }

    #[test]
    fn valid_profiles_are_not_reported_expired() {
        let (_dir, store) = store();
        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
        write(
            &store,
            &format!(
                "[valid]\nrolesync_managed=true\nexpire={future}\n\n\
                 [unmanaged]\nregion=us-east-1\n"
            ),
        );

        assert!(!store.any_managed_expired().unwrap());
    }
}
