use crate::diagnostics::{DiagnosticBag, SourcePosition};
use crate::helpers;
use crate::serialization::SerializerKind;
use crate::target::Target;
use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Handle into [`ProgramModel::reactors`]. Federate fragments reference shared
/// reactor definitions through these handles instead of deep-cloning subtrees,
/// so no two federates can ever alias mutable reactor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactorId(pub usize);

/// The value type inferred for a port, action or connection by the front end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InferredType {
    #[default]
    Void,
    Time,
    Named(String),
}

impl From<String> for InferredType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" | "void" => InferredType::Void,
            "time" => InferredType::Time,
            _ => InferredType::Named(s),
        }
    }
}

impl From<InferredType> for String {
    fn from(t: InferredType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferredType::Void => write!(f, "void"),
            InferredType::Time => write!(f, "time"),
            InferredType::Named(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    #[serde(default)]
    pub value_type: InferredType,
    /// Multiport width; 1 for a plain port.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Width determined at runtime rather than statically.
    #[serde(default)]
    pub variable_width: bool,
}

fn default_width() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecl {
    pub name: String,
    #[serde(default)]
    pub value_type: InferredType,
    /// Minimum logical delay in nanoseconds.
    #[serde(default)]
    pub min_delay: Option<u64>,
    #[serde(default)]
    pub physical: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value_type: InferredType,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVar {
    pub name: String,
    #[serde(default)]
    pub value_type: InferredType,
    #[serde(default)]
    pub initial: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub effects: Vec<String>,
    /// Target-language body, passed through verbatim.
    pub body: String,
    #[serde(default)]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instantiation {
    pub name: String,
    pub reactor: ReactorId,
    #[serde(default)]
    pub position: Option<SourcePosition>,
}

/// Reference to a port on a child instantiation, by name. An empty instance
/// refers to a port of the containing reactor itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    pub instance: String,
    pub port: String,
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}", self.port)
        } else {
            write!(f, "{}.{}", self.instance, self.port)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub source: PortRef,
    pub sink: PortRef,
    #[serde(default)]
    pub value_type: InferredType,
    /// Declared wire encoding for this connection.
    #[serde(default)]
    pub serializer: SerializerKind,
    /// `after` delay in nanoseconds, if any.
    #[serde(default)]
    pub after: Option<u64>,
    #[serde(default)]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorDef {
    pub name: String,
    /// File-level user code block emitted ahead of the reactor.
    #[serde(default)]
    pub preamble: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub state: Vec<StateVar>,
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
    #[serde(default)]
    pub actions: Vec<ActionDecl>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub instantiations: Vec<Instantiation>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub position: Option<SourcePosition>,
}

impl ReactorDef {
    pub fn find_input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn find_output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// Target properties declared in the program description. Unknown toolchain
/// settings stay with the front end; only what the backend consumes is here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetProperties {
    /// Compiler executable override, passed to the toolchain via environment.
    #[serde(default)]
    pub compiler: Option<String>,
    /// Emit a container-image descriptor per federate.
    #[serde(default)]
    pub docker: bool,
}

/// In-memory representation of one validated program. Produced by the
/// (excluded) front end and treated as read-only by everything in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramModel {
    pub name: String,
    pub target: Target,
    #[serde(default)]
    pub target_properties: TargetProperties,
    pub reactors: Vec<ReactorDef>,
    #[serde(default)]
    pub main: Option<ReactorId>,
    #[serde(default)]
    pub federated: bool,
}

impl ProgramModel {
    pub fn from_json_file(path: &Path) -> Result<ProgramModel> {
        let contents = helpers::read_file(path)?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse program model at {}", path.display()))
    }

    pub fn resolve(&self, id: ReactorId) -> Option<&ReactorDef> {
        self.reactors.get(id.0)
    }

    /// The designated main reactor, if it exists and resolves.
    pub fn main_reactor(&self) -> Option<&ReactorDef> {
        self.main.and_then(|id| self.resolve(id))
    }

    /// All reactor definitions reachable from `root` through instantiations,
    /// `root` included. Order is the handle order, so it is deterministic.
    pub fn reachable_reactors(&self, root: ReactorId) -> AHashSet<ReactorId> {
        let mut reachable = AHashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(reactor) = self.resolve(id) {
                for instantiation in &reactor.instantiations {
                    stack.push(instantiation.reactor);
                }
            }
        }
        reachable
    }

    /// Model validation: every instantiation must reference a resolvable
    /// reactor and every connection endpoint must name a known instantiation
    /// and port. A missing main is not an error here; the pipeline treats it
    /// as "nothing to do".
    pub fn validate(&self) -> DiagnosticBag {
        let mut bag = DiagnosticBag::new();
        for reactor in &self.reactors {
            let mut children: AHashMap<&str, &ReactorDef> = AHashMap::new();
            for instantiation in &reactor.instantiations {
                match self.resolve(instantiation.reactor) {
                    Some(child) => {
                        children.insert(instantiation.name.as_str(), child);
                    }
                    None => bag.report(
                        crate::diagnostics::Severity::Error,
                        format!(
                            "Instantiation '{}' in reactor '{}' references an unresolvable reactor definition",
                            instantiation.name, reactor.name
                        ),
                        instantiation.position.clone(),
                    ),
                }
            }
            for connection in &reactor.connections {
                for (end, port_ref, is_source) in [
                    ("source", &connection.source, true),
                    ("sink", &connection.sink, false),
                ] {
                    if port_ref.instance.is_empty() {
                        continue;
                    }
                    match children.get(port_ref.instance.as_str()) {
                        None => bag.report(
                            crate::diagnostics::Severity::Error,
                            format!(
                                "Connection {} '{}' in reactor '{}' names an unknown instantiation",
                                end, port_ref, reactor.name
                            ),
                            connection.position.clone(),
                        ),
                        Some(child) => {
                            let port = if is_source {
                                child.find_output(&port_ref.port)
                            } else {
                                child.find_input(&port_ref.port)
                            };
                            if port.is_none() {
                                bag.report(
                                    crate::diagnostics::Severity::Error,
                                    format!(
                                        "Connection {} '{}' in reactor '{}' names an unknown port",
                                        end, port_ref, reactor.name
                                    ),
                                    connection.position.clone(),
                                );
                            }
                        }
                    }
                }
            }
        }
        if self.federated
            && let Some(main) = self.main_reactor()
            && main.instantiations.is_empty()
        {
            bag.error(format!(
                "Main reactor '{}' is marked federated but contains no federate instantiations",
                main.name
            ));
        }
        bag
    }
}

#[cfg(test)]
pub mod test_fixtures {
    use super::*;

    /// A minimal non-federated program: one `Source` reactor instantiated by
    /// `Main`, with a self-contained reaction.
    pub fn simple_program(target: Target) -> ProgramModel {
        ProgramModel {
            name: "Simple".to_string(),
            target,
            target_properties: TargetProperties::default(),
            reactors: vec![
                ReactorDef {
                    name: "Source".to_string(),
                    preamble: None,
                    parameters: vec![],
                    state: vec![],
                    inputs: vec![],
                    outputs: vec![Port {
                        name: "out".to_string(),
                        value_type: InferredType::Named("int".to_string()),
                        width: 1,
                        variable_width: false,
                    }],
                    actions: vec![],
                    reactions: vec![Reaction {
                        triggers: vec!["startup".to_string()],
                        effects: vec!["out".to_string()],
                        body: "lf_set(out, 42);".to_string(),
                        position: None,
                    }],
                    instantiations: vec![],
                    connections: vec![],
                    position: None,
                },
                ReactorDef {
                    name: "Main".to_string(),
                    preamble: None,
                    parameters: vec![],
                    state: vec![],
                    inputs: vec![],
                    outputs: vec![],
                    actions: vec![],
                    reactions: vec![],
                    instantiations: vec![Instantiation {
                        name: "s".to_string(),
                        reactor: ReactorId(0),
                        position: None,
                    }],
                    connections: vec![],
                    position: None,
                },
            ],
            main: Some(ReactorId(1)),
            federated: false,
        }
    }

    /// A federated program with two federates joined by one cross-boundary
    /// connection carrying an `int`.
    pub fn federated_program(target: Target, serializer: SerializerKind) -> ProgramModel {
        ProgramModel {
            name: "Fed".to_string(),
            target,
            target_properties: TargetProperties::default(),
            reactors: vec![
                ReactorDef {
                    name: "Sender".to_string(),
                    preamble: None,
                    parameters: vec![],
                    state: vec![],
                    inputs: vec![],
                    outputs: vec![Port {
                        name: "out".to_string(),
                        value_type: InferredType::Named("int".to_string()),
                        width: 1,
                        variable_width: false,
                    }],
                    actions: vec![],
                    reactions: vec![Reaction {
                        triggers: vec!["startup".to_string()],
                        effects: vec!["out".to_string()],
                        body: "lf_set(out, 1);".to_string(),
                        position: None,
                    }],
                    instantiations: vec![],
                    connections: vec![],
                    position: None,
                },
                ReactorDef {
                    name: "Receiver".to_string(),
                    preamble: None,
                    parameters: vec![],
                    state: vec![],
                    inputs: vec![Port {
                        name: "inp".to_string(),
                        value_type: InferredType::Named("int".to_string()),
                        width: 1,
                        variable_width: false,
                    }],
                    outputs: vec![],
                    actions: vec![],
                    reactions: vec![Reaction {
                        triggers: vec!["inp".to_string()],
                        effects: vec![],
                        body: "printf(\"%d\\n\", inp->value);".to_string(),
                        position: None,
                    }],
                    instantiations: vec![],
                    connections: vec![],
                    position: None,
                },
                ReactorDef {
                    name: "Fed".to_string(),
                    preamble: None,
                    parameters: vec![],
                    state: vec![],
                    inputs: vec![],
                    outputs: vec![],
                    actions: vec![],
                    reactions: vec![],
                    instantiations: vec![
                        Instantiation {
                            name: "sender".to_string(),
                            reactor: ReactorId(0),
                            position: None,
                        },
                        Instantiation {
                            name: "receiver".to_string(),
                            reactor: ReactorId(1),
                            position: None,
                        },
                    ],
                    connections: vec![Connection {
                        source: PortRef {
                            instance: "sender".to_string(),
                            port: "out".to_string(),
                        },
                        sink: PortRef {
                            instance: "receiver".to_string(),
                            port: "inp".to_string(),
                        },
                        value_type: InferredType::Named("int".to_string()),
                        serializer,
                        after: None,
                        position: None,
                    }],
                    position: None,
                },
            ],
            main: Some(ReactorId(2)),
            federated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;

    #[test]
    fn validates_clean_program() {
        let program = simple_program(Target::C);
        let bag = program.validate();
        assert!(!bag.has_errors(), "unexpected diagnostics: {:?}", bag);
    }

    #[test]
    fn unresolvable_instantiation_is_an_error() {
        let mut program = simple_program(Target::C);
        program.reactors[1].instantiations[0].reactor = ReactorId(99);
        assert!(program.validate().has_errors());
    }

    #[test]
    fn unknown_connection_endpoint_is_an_error() {
        let mut program = federated_program(Target::C, SerializerKind::Native);
        program.reactors[2].connections[0].sink.instance = "nobody".to_string();
        assert!(program.validate().has_errors());
    }

    #[test]
    fn federated_main_without_instantiations_is_an_error() {
        let mut program = federated_program(Target::C, SerializerKind::Native);
        program.reactors[2].instantiations.clear();
        program.reactors[2].connections.clear();
        assert!(program.validate().has_errors());
    }

    #[test]
    fn reachable_set_includes_root_and_children() {
        let program = federated_program(Target::C, SerializerKind::Native);
        let reachable = program.reachable_reactors(ReactorId(2));
        assert_eq!(reachable.len(), 3);

        let sender_only = program.reachable_reactors(ReactorId(0));
        assert_eq!(sender_only.len(), 1);
    }

    #[test]
    fn inferred_type_round_trips_through_json() {
        let json = r#"{"name": "p", "value_type": "int"}"#;
        let port: Port = serde_json::from_str(json).unwrap();
        assert_eq!(port.value_type, InferredType::Named("int".to_string()));

        let json = r#"{"name": "p"}"#;
        let port: Port = serde_json::from_str(json).unwrap();
        assert_eq!(port.value_type, InferredType::Void);
    }
}
