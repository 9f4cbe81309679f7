use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::error::TemplateError;
use crate::types::NicArgs;

/// IPAM type that turns on per-interface address leasing
pub const MULTI_NIC_IPAM_TYPE: &str = "multi-nic-ipam";

/// Parsed multi-NIC network attachment configuration
#[derive(Debug, Clone)]
pub struct AttachmentTemplate {
    pub cni_version: String,
    pub name: String,
    /// Top-level IPAM block, shared by every interface in legacy mode
    pub ipam: Option<Value>,
    pub plugin: PluginTemplate,
    pub subnet: String,
    /// Candidate address spaces
    pub master_nets: Vec<String>,
    pub multi_nic_ipam: bool,
    pub daemon_ip: String,
    pub daemon_port: u16,
    pub args: NicArgs,
}

#[derive(Debug, Default, Deserialize)]
struct TemplateArgs {
    #[serde(default)]
    cni: NicArgs,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTemplate {
    #[serde(default)]
    cni_version: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    ipam: Option<Value>,
    #[serde(default)]
    plugin: Option<Box<RawValue>>,
    #[serde(default)]
    subnet: String,
    #[serde(default)]
    master_nets: Vec<String>,
    #[serde(rename = "multiNICIPAM", default)]
    multi_nic_ipam: bool,
    #[serde(rename = "daemonIP", default)]
    daemon_ip: String,
    #[serde(default)]
    daemon_port: u16,
    #[serde(default)]
    args: TemplateArgs,
}

impl AttachmentTemplate {
    /// Parse and classify a raw template
    pub fn parse(bytes: &[u8]) -> Result<Self, TemplateError> {
        let raw: RawTemplate = serde_json::from_slice(bytes)?;
        let plugin = match raw.plugin {
            Some(plugin) => PluginTemplate::classify(&plugin)?,
            None => return Err(TemplateError::MissingPlugin),
        };

        Ok(Self {
            cni_version: raw.cni_version,
            name: raw.name,
            ipam: raw.ipam,
            plugin,
            subnet: raw.subnet,
            master_nets: raw.master_nets,
            multi_nic_ipam: raw.multi_nic_ipam,
            daemon_ip: raw.daemon_ip,
            daemon_port: raw.daemon_port,
            args: raw.args.cni,
        })
    }

    /// Type of the top-level IPAM block, if any
    pub fn ipam_type(&self) -> Option<&str> {
        self.ipam.as_ref()?.get("type")?.as_str()
    }
}

/// Plugin descriptor with the fields the synthesizer rewrites; everything
/// else passes through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    #[serde(rename = "deviceID", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Chain form: header fields, the main element and the untouched tail
#[derive(Debug, Clone)]
pub struct ChainTemplate {
    header: Map<String, Value>,
    main: PluginDescriptor,
    rest: Vec<Box<RawValue>>,
}

impl ChainTemplate {
    pub fn main(&self) -> &PluginDescriptor {
        &self.main
    }

    pub fn rest(&self) -> &[Box<RawValue>] {
        &self.rest
    }

    pub fn len(&self) -> usize {
        self.rest.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Chain document with `main` substituted for the first element
    pub fn document<'a>(&'a self, main: &'a PluginDescriptor) -> ChainDocument<'a> {
        let mut plugins = Vec::with_capacity(self.len());
        plugins.push(ChainEntry::Main(main));
        plugins.extend(self.rest.iter().map(|raw| ChainEntry::Raw(raw.as_ref())));
        ChainDocument {
            header: &self.header,
            plugins,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PluginTemplate {
    Simple(PluginDescriptor),
    Chain(ChainTemplate),
}

#[derive(Deserialize)]
struct ChainBody {
    #[serde(default)]
    plugins: Vec<Box<RawValue>>,
}

impl PluginTemplate {
    /// A non-empty `type` makes a simple plugin, otherwise a non-empty
    /// `plugins` list makes a chain
    pub fn classify(raw: &RawValue) -> Result<Self, TemplateError> {
        let mut header: Map<String, Value> = serde_json::from_str(raw.get())?;
        let simple = header
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|plugin_type| !plugin_type.is_empty());

        if simple {
            let descriptor = serde_json::from_value(Value::Object(header))?;
            return Ok(PluginTemplate::Simple(descriptor));
        }

        if !header.contains_key("plugins") {
            return Err(TemplateError::MissingPlugin);
        }

        let body: ChainBody = serde_json::from_str(raw.get())?;
        let mut plugins = body.plugins.into_iter();
        let first = plugins.next().ok_or(TemplateError::EmptyChain)?;
        let main: PluginDescriptor = serde_json::from_str(first.get())?;
        header.insert("plugins".to_string(), Value::Null);

        Ok(PluginTemplate::Chain(ChainTemplate {
            header,
            main,
            rest: plugins.collect(),
        }))
    }

    /// Descriptor that receives the per-interface bindings
    pub fn main(&self) -> &PluginDescriptor {
        match self {
            PluginTemplate::Simple(descriptor) => descriptor,
            PluginTemplate::Chain(chain) => chain.main(),
        }
    }

    pub fn is_chain(&self) -> bool {
        matches!(self, PluginTemplate::Chain(_))
    }

    /// Short human readable classification
    pub fn describe(&self) -> String {
        match self {
            PluginTemplate::Simple(descriptor) => format!("simple ({})", descriptor.plugin_type),
            PluginTemplate::Chain(chain) => {
                let mut types = vec![chain.main().plugin_type.clone()];
                for raw in chain.rest() {
                    let plugin_type = serde_json::from_str::<Value>(raw.get())
                        .ok()
                        .and_then(|value| value.get("type")?.as_str().map(str::to_string))
                        .unwrap_or_else(|| "?".to_string());
                    types.push(plugin_type);
                }
                format!("chain [{}]", types.join(", "))
            }
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChainEntry<'a> {
    Main(&'a PluginDescriptor),
    Raw(&'a RawValue),
}

/// Serializable chain document that keeps the template's header order
pub struct ChainDocument<'a> {
    header: &'a Map<String, Value>,
    plugins: Vec<ChainEntry<'a>>,
}

impl Serialize for ChainDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.header.len()))?;
        for (key, value) in self.header {
            if key == "plugins" {
                map.serialize_entry(key, &self.plugins)?;
            } else {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}
