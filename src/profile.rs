//! Named routing profiles and their XML store.
//!
//! A profile is declarative routing intent: default edges, clients to start
//! before activation, input priorities, and whether activation should attach
//! an input source automatically. Profiles persist as a single XML document
//! under the per-user config directory; the store seeds `default` and
//! `live-broadcast` on first run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::Writer;

/// Profile file name inside the config directory.
const STORE_FILE: &str = "jack-profiles.xml";

/// The one profile that can never be deleted.
pub const DEFAULT_PROFILE: &str = "default";

/// Errors from loading or persisting the profile store.
#[derive(Debug, thiserror::Error)]
pub enum ProfileStoreError {
    /// Reading or writing the store file failed.
    #[error("profile store I/O error: {path}: {source}")]
    Io {
        /// Path of the store file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The store file is not valid profile XML.
    #[error("profile store parse error: {0}")]
    Xml(String),
}

/// Declarative description of desired routing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Profile name, unique within the store.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Default edges, source port to sink port.
    pub connections: BTreeMap<String, String>,
    /// Clients to start before activation, in order.
    pub auto_clients: Vec<String>,
    /// Whether activation performs automatic input attachment.
    pub auto_activate: bool,
    /// Input priorities, client name to value (higher is preferred).
    pub priorities: BTreeMap<String, i32>,
}

impl Profile {
    /// Creates an empty profile with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            connections: BTreeMap::new(),
            auto_clients: Vec::new(),
            auto_activate: false,
            priorities: BTreeMap::new(),
        }
    }

    /// Priority of a client under this profile; absent clients rank 0.
    pub fn priority_of(&self, client: &str) -> i32 {
        self.priorities.get(client).copied().unwrap_or(0)
    }
}

/// Keyed mapping of profile names to profiles, backed by an XML file.
pub struct ProfileStore {
    path: PathBuf,
    profiles: BTreeMap<String, Profile>,
}

impl ProfileStore {
    /// The per-user store path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("airpatch")
            .join(STORE_FILE)
    }

    /// Opens the store at `path`, seeding the built-in profiles when the
    /// file does not exist or cannot be parsed. Parse failures are logged,
    /// never fatal.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profiles = if path.exists() {
            match Self::load(&path) {
                Ok(profiles) => profiles,
                Err(err) => {
                    tracing::warn!(?err, path = %path.display(), "unreadable profile store, seeding defaults");
                    Self::seed()
                }
            }
        } else {
            Self::seed()
        };
        Self { path, profiles }
    }

    /// Looks up a profile by name.
    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// All profile names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// All profiles, sorted by name.
    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// Inserts or replaces a profile and persists the store.
    pub fn save_profile(&mut self, profile: Profile) -> Result<(), ProfileStoreError> {
        self.profiles.insert(profile.name.clone(), profile);
        self.persist()
    }

    /// Removes a profile and persists the store. The `default` profile is
    /// never removed; attempting it returns false.
    pub fn delete_profile(&mut self, name: &str) -> bool {
        if name == DEFAULT_PROFILE {
            tracing::warn!("refusing to delete the default profile");
            return false;
        }
        if self.profiles.remove(name).is_none() {
            return false;
        }
        if let Err(err) = self.persist() {
            tracing::warn!(?err, "could not persist profile store after delete");
        }
        true
    }

    /// Writes the store file, creating parent directories as needed.
    pub fn persist(&self) -> Result<(), ProfileStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ProfileStoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        let xml = write_profiles(self.profiles.values())?;
        fs::write(&self.path, xml).map_err(|source| ProfileStoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn load(path: &Path) -> Result<BTreeMap<String, Profile>, ProfileStoreError> {
        let text = fs::read_to_string(path).map_err(|source| ProfileStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_profiles(&text)
    }

    fn seed() -> BTreeMap<String, Profile> {
        let mut profiles = BTreeMap::new();

        let mut default = Profile::named(DEFAULT_PROFILE);
        default.description = "Default broadcast routing".to_string();
        default.auto_activate = true;
        profiles.insert(default.name.clone(), default);

        let mut live = Profile::named("live-broadcast");
        live.description = "Live on-air broadcasting with processing chain".to_string();
        live.auto_activate = true;
        live.auto_clients = vec!["stereo_tool".to_string(), "liquidsoap".to_string()];
        live.connections = BTreeMap::from([
            (
                "rivendell_0:playout_0L".to_string(),
                "stereo_tool:in_1".to_string(),
            ),
            (
                "rivendell_0:playout_0R".to_string(),
                "stereo_tool:in_2".to_string(),
            ),
            (
                "stereo_tool:out_l".to_string(),
                "liquidsoap:in_0".to_string(),
            ),
            (
                "stereo_tool:out_r".to_string(),
                "liquidsoap:in_1".to_string(),
            ),
        ]);
        live.priorities = BTreeMap::from([
            ("system".to_string(), 100),
            ("vlc".to_string(), 80),
            ("liquidsoap".to_string(), 60),
        ]);
        profiles.insert(live.name.clone(), live);

        profiles
    }
}

fn attr(elem: &BytesStart, name: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Which text-carrying element the parser is currently inside.
enum TextField {
    None,
    Description,
    AutoActivate,
    AutoClient,
}

fn parse_profiles(xml: &str) -> Result<BTreeMap<String, Profile>, ProfileStoreError> {
    let mut reader = Reader::from_str(xml);

    let mut profiles = BTreeMap::new();
    let mut current: Option<Profile> = None;
    let mut field = TextField::None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"profile" => {
                    let name = attr(e, b"name")
                        .ok_or_else(|| ProfileStoreError::Xml("profile without name".into()))?;
                    current = Some(Profile::named(name));
                }
                b"description" => field = TextField::Description,
                b"auto_activate" => field = TextField::AutoActivate,
                b"client" => field = TextField::AutoClient,
                b"priority" => {
                    if let Some(profile) = current.as_mut() {
                        let client = attr(e, b"client").ok_or_else(|| {
                            ProfileStoreError::Xml("priority without client".into())
                        })?;
                        let value = attr(e, b"value")
                            .and_then(|v| v.parse::<i32>().ok())
                            .ok_or_else(|| {
                                ProfileStoreError::Xml("priority without numeric value".into())
                            })?;
                        profile.priorities.insert(client, value);
                    }
                }
                b"edge" => {
                    if let Some(profile) = current.as_mut() {
                        let source = attr(e, b"source")
                            .ok_or_else(|| ProfileStoreError::Xml("edge without source".into()))?;
                        let sink = attr(e, b"sink")
                            .ok_or_else(|| ProfileStoreError::Xml("edge without sink".into()))?;
                        profile.connections.insert(source, sink);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) => {
                if let Some(profile) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| ProfileStoreError::Xml(e.to_string()))?;
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match field {
                        TextField::Description => profile.description = text.to_string(),
                        TextField::AutoActivate => {
                            profile.auto_activate = text == "true" || text == "1";
                        }
                        TextField::AutoClient => profile.auto_clients.push(text.to_string()),
                        TextField::None => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                field = TextField::None;
                if e.name().as_ref() == b"profile" {
                    if let Some(profile) = current.take() {
                        profiles.insert(profile.name.clone(), profile);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ProfileStoreError::Xml(e.to_string())),
        }
    }

    Ok(profiles)
}

fn xml_err<E: std::fmt::Display>(e: E) -> ProfileStoreError {
    ProfileStoreError::Xml(e.to_string())
}

fn write_profiles<'a>(
    profiles: impl Iterator<Item = &'a Profile>,
) -> Result<String, ProfileStoreError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("profiles")))
        .map_err(xml_err)?;

    for profile in profiles {
        let mut start = BytesStart::new("profile");
        start.push_attribute(("name", profile.name.as_str()));
        writer.write_event(Event::Start(start)).map_err(xml_err)?;

        writer
            .write_event(Event::Start(BytesStart::new("description")))
            .map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::new(&profile.description)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("description")))
            .map_err(xml_err)?;

        writer
            .write_event(Event::Start(BytesStart::new("auto_activate")))
            .map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::new(if profile.auto_activate {
                "true"
            } else {
                "false"
            })))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("auto_activate")))
            .map_err(xml_err)?;

        writer
            .write_event(Event::Start(BytesStart::new("auto_clients")))
            .map_err(xml_err)?;
        for client in &profile.auto_clients {
            writer
                .write_event(Event::Start(BytesStart::new("client")))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(client)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("client")))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("auto_clients")))
            .map_err(xml_err)?;

        writer
            .write_event(Event::Start(BytesStart::new("priorities")))
            .map_err(xml_err)?;
        for (client, value) in &profile.priorities {
            let mut el = BytesStart::new("priority");
            el.push_attribute(("client", client.as_str()));
            el.push_attribute(("value", value.to_string().as_str()));
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("priorities")))
            .map_err(xml_err)?;

        writer
            .write_event(Event::Start(BytesStart::new("connections")))
            .map_err(xml_err)?;
        for (source, sink) in &profile.connections {
            let mut el = BytesStart::new("edge");
            el.push_attribute(("source", source.as_str()));
            el.push_attribute(("sink", sink.as_str()));
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("connections")))
            .map_err(xml_err)?;

        writer
            .write_event(Event::End(BytesEnd::new("profile")))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("profiles")))
        .map_err(xml_err)?;

    String::from_utf8(writer.into_inner()).map_err(|e| ProfileStoreError::Xml(e.to_string()))
}
