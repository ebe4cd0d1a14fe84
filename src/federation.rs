pub mod launcher;
pub mod partition;

use crate::generate::artifact::{CodeBuilder, CodeMap};
use crate::model::{ActionDecl, Connection, InferredType, Instantiation, PortRef, ProgramModel, ReactorId};
use crate::serialization::{DESERIALIZED_VAR, SERIALIZED_VAR, SerializerKind, strategy_for};
use crate::target::{Target, TargetBackend};
use anyhow::{Result, anyhow};
use convert_case::{Case, Casing};
use serde::Serialize;

/// A connection whose endpoints live in different federates. Replaces the
/// original connection with a send/receive pair over the network.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkConnection {
    /// Stable serial used to name the synthesized network action and to key
    /// the socket the launcher wires up.
    pub serial: usize,
    pub source_federate: usize,
    pub sink_federate: usize,
    pub source: PortRef,
    pub sink: PortRef,
    pub value_type: InferredType,
    pub serializer: SerializerKind,
}

impl NetworkConnection {
    pub fn action_name(&self) -> String {
        format!("network_message_{}", self.serial)
    }

    pub fn action_decl(&self) -> ActionDecl {
        ActionDecl {
            name: self.action_name(),
            value_type: self.value_type.clone(),
            min_delay: None,
            physical: true,
        }
    }
}

/// One independently deployable unit of a federated program. Never mutated
/// after partitioning; the fragment references shared reactor definitions by
/// handle.
#[derive(Debug, Clone, Serialize)]
pub struct Federate {
    pub name: String,
    pub index: usize,
    /// The top-level instantiation this federate was carved from.
    pub instantiation: Instantiation,
    /// Reactor definitions reachable from the instantiation, sorted by handle.
    pub reactors: Vec<ReactorId>,
    /// Connections fully inside this federate, kept untouched.
    pub intra_connections: Vec<Connection>,
    /// Serials into [`FederationPlan::network`].
    pub outbound: Vec<usize>,
    pub inbound: Vec<usize>,
}

impl Federate {
    /// Executable name for this federate's compiled unit.
    pub fn executable(&self, program_name: &str) -> String {
        format!(
            "{}_{}",
            program_name.to_case(Case::Snake),
            self.name.to_case(Case::Snake)
        )
    }

    pub fn directory_name(&self) -> String {
        format!("federate__{}", self.name)
    }
}

/// Output of the partitioner: the full set of federates plus every
/// cross-boundary connection. Federates are independent of each other once
/// this exists; generation per federate may run in any order or in parallel.
#[derive(Debug, Serialize)]
pub struct FederationPlan {
    pub program: String,
    pub federates: Vec<Federate>,
    pub network: Vec<NetworkConnection>,
}

/// Synthesized send/receive stubs for every network connection touching
/// `federate`, as one source file. Serialization failures here are fatal for
/// this federate only; sibling federates are still attempted. Compatibility
/// checks run against the program's configured compiler, not the target's
/// default.
pub fn emit_network_glue(
    program: &ProgramModel,
    plan: &FederationPlan,
    federate: &Federate,
    backend: &dyn TargetBackend,
) -> Result<CodeMap> {
    let capabilities = backend
        .capabilities()
        .with_compiler(program.target_properties.compiler.as_deref());
    let mut code = CodeBuilder::new();
    match backend.target() {
        Target::C => {
            code.pr(format!(
                "// Network glue for federate {} -- generated, do not edit.",
                federate.name
            ));
            code.pr("#include \"rhea_runtime.h\"");
            code.pr("#include \"rhea_net_common.h\"");
        }
        Target::Python => {
            code.pr(format!(
                "# Network glue for federate {} -- generated, do not edit.",
                federate.name
            ));
            code.pr("from rhea_runtime import *  # noqa: F401,F403");
        }
    }
    code.blank();

    for serial in &federate.outbound {
        let connection = &plan.network[*serial];
        emit_send_stub(&mut code, connection, backend, &capabilities)?;
        code.blank();
    }
    for serial in &federate.inbound {
        let connection = &plan.network[*serial];
        emit_receive_stub(&mut code, connection, backend, &capabilities)?;
        code.blank();
    }

    Ok(code.build(format!("network_glue.{}", backend.file_extension())))
}

fn resolve_strategy(
    connection: &NetworkConnection,
    backend: &dyn TargetBackend,
    capabilities: &crate::target::TargetCapabilities,
) -> Result<Box<dyn crate::serialization::SerializationStrategy>> {
    let strategy = strategy_for(connection.serializer, backend.target()).map_err(|err| {
        anyhow!(
            "{err} (connection {} -> {})",
            connection.source,
            connection.sink
        )
    })?;
    strategy.is_compatible(capabilities).map_err(|reason| {
        anyhow!(
            "Unsupported serialization on connection {} -> {}: {reason}",
            connection.source,
            connection.sink
        )
    })?;
    Ok(strategy)
}

/// Reaction body invoked on the source federate when the source port is
/// present: serialize, then hand the buffer to the runtime's send primitive.
fn emit_send_stub(
    code: &mut CodeBuilder,
    connection: &NetworkConnection,
    backend: &dyn TargetBackend,
    capabilities: &crate::target::TargetCapabilities,
) -> Result<()> {
    let serial = connection.serial;
    let source = &connection.source;
    match backend.target() {
        Target::C => {
            code.pr(format!(
                "// {} -> {} ({} serialization)",
                connection.source, connection.sink, connection.serializer
            ));
            code.pr(format!("void send_network_message_{serial}(void* {}) {{", source.port));
            code.indent();
            if connection.value_type == InferredType::Void {
                // Nothing to encode; presence itself is the message.
                code.pr(format!(
                    "{}({serial}, 0, (unsigned char*)0);",
                    capabilities.network_send
                ));
            } else {
                let strategy = resolve_strategy(connection, backend, capabilities)?;
                code.pr(strategy.emit_serializer(&format!("*({}*){}", c_payload_type(&connection.value_type), source.port), &connection.value_type));
                code.pr(format!(
                    "size_t _message_length = {};",
                    strategy.length_expression(SERIALIZED_VAR)
                ));
                code.pr(format!(
                    "{}({serial}, _message_length, {});",
                    capabilities.network_send,
                    strategy.buffer_expression(SERIALIZED_VAR)
                ));
            }
            code.unindent();
            code.pr("}");
        }
        Target::Python => {
            code.pr(format!(
                "# {} -> {} ({} serialization)",
                connection.source, connection.sink, connection.serializer
            ));
            code.pr(format!("def send_network_message_{serial}({}):", source.port));
            code.indent();
            if connection.value_type == InferredType::Void {
                code.pr(format!("{}({serial}, 0, b\"\")", capabilities.network_send));
            } else {
                let strategy = resolve_strategy(connection, backend, capabilities)?;
                code.pr(strategy.emit_serializer(&format!("{}.value", source.port), &connection.value_type));
                code.pr(format!(
                    "{}({serial}, {}, {})",
                    capabilities.network_send,
                    strategy.length_expression(SERIALIZED_VAR),
                    strategy.buffer_expression(SERIALIZED_VAR)
                ));
            }
            code.unindent();
        }
    }
    Ok(())
}

/// Reaction body triggered by the synthesized receive action on the sink
/// federate: deserialize and assign to the original sink port.
fn emit_receive_stub(
    code: &mut CodeBuilder,
    connection: &NetworkConnection,
    backend: &dyn TargetBackend,
    capabilities: &crate::target::TargetCapabilities,
) -> Result<()> {
    let serial = connection.serial;
    let action = connection.action_decl();
    let sink = &connection.sink;
    let sink_port = crate::model::Port {
        name: format!("{}.{}", sink.instance, sink.port),
        value_type: connection.value_type.clone(),
        width: 1,
        variable_width: false,
    };
    match backend.target() {
        Target::C => {
            code.pr(format!(
                "// {} -> {} ({} serialization)",
                connection.source, connection.sink, connection.serializer
            ));
            code.pr(format!(
                "void receive_network_message_{serial}(void* {}) {{",
                action.name
            ));
            code.indent();
            if connection.value_type == InferredType::Void {
                // Token pass-through; the target compiler owns the typing.
                code.pr(backend.forward_body(&action, &sink_port));
            } else {
                let strategy = resolve_strategy(connection, backend, capabilities)?;
                code.pr(strategy.emit_deserializer(
                    &format!("((token_t*){})->value", action.name),
                    &connection.value_type,
                ));
                code.pr(format!("lf_set({}, {DESERIALIZED_VAR});", sink_port.name));
            }
            code.unindent();
            code.pr("}");
        }
        Target::Python => {
            code.pr(format!(
                "# {} -> {} ({} serialization)",
                connection.source, connection.sink, connection.serializer
            ));
            code.pr(format!("def receive_network_message_{serial}({}):", action.name));
            code.indent();
            if connection.value_type == InferredType::Void {
                code.pr(backend.forward_body(&action, &sink_port));
            } else {
                let strategy = resolve_strategy(connection, backend, capabilities)?;
                code.pr(strategy.emit_deserializer(&format!("{}.value", action.name), &connection.value_type));
                code.pr(format!("{}.set({DESERIALIZED_VAR})", sink_port.name));
            }
            code.unindent();
        }
    }
    Ok(())
}

/// Entry-point file for one federate: the fragment's top-level instantiation
/// plus declarations of every synthesized network action, fully spliced --
/// not a raw copy of the container's source text.
pub fn emit_federate_main(
    program: &ProgramModel,
    plan: &FederationPlan,
    federate: &Federate,
    backend: &dyn TargetBackend,
) -> Result<CodeMap> {
    let top = program
        .resolve(federate.instantiation.reactor)
        .ok_or_else(|| {
            anyhow!(
                "Federate '{}' references an unresolvable reactor definition",
                federate.name
            )
        })?;
    let mut code = CodeBuilder::new();
    match backend.target() {
        Target::C => {
            code.pr(format!(
                "// Federate {} of program {} -- generated, do not edit.",
                federate.name, plan.program
            ));
            code.pr("#include \"rhea_runtime.h\"");
            code.pr("#include \"rhea_net_common.h\"");
            code.blank();
            code.pr(format!(
                "// top-level instance {} : {}",
                federate.instantiation.name, top.name
            ));
            for serial in federate.inbound.iter().chain(federate.outbound.iter()) {
                let connection = &plan.network[*serial];
                code.pr(format!(
                    "// network action {} ({})",
                    connection.action_name(),
                    backend.tag_type()
                ));
            }
            code.blank();
            code.pr("int main(int argc, const char* argv[]) {");
            code.indent();
            code.pr("return lf_reactor_c_main(argc, argv);");
            code.unindent();
            code.pr("}");
        }
        Target::Python => {
            code.pr(format!(
                "# Federate {} of program {} -- generated, do not edit.",
                federate.name, plan.program
            ));
            code.pr(format!(
                "from {} import {}",
                top.name.to_case(Case::Snake),
                top.name.to_case(Case::Pascal)
            ));
            code.pr("from network_glue import *  # noqa: F401,F403");
            code.blank();
            code.blank();
            code.pr("def main():");
            code.indent();
            code.pr(format!(
                "{} = {}()",
                federate.instantiation.name,
                top.name.to_case(Case::Pascal)
            ));
            code.unindent();
            code.blank();
            code.blank();
            code.pr("if __name__ == \"__main__\":");
            code.indent();
            code.pr("main()");
            code.unindent();
        }
    }
    Ok(code.build(format!("main.{}", backend.file_extension())))
}

fn c_payload_type(value_type: &InferredType) -> String {
    match value_type {
        InferredType::Void => "void".to_string(),
        InferredType::Time => "interval_t".to_string(),
        InferredType::Named(name) => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::partition::partition;
    use super::*;
    use crate::model::test_fixtures::federated_program;
    use crate::target::backend_for;

    #[test]
    fn glue_contains_send_and_receive_stubs() {
        let program = federated_program(Target::C, SerializerKind::Native);
        let plan = partition(&program).unwrap();
        let backend = backend_for(Target::C).unwrap();

        let sender_glue =
            emit_network_glue(&program, &plan, &plan.federates[0], backend.as_ref()).unwrap();
        assert!(sender_glue.text.contains("send_network_message_0"));
        assert!(sender_glue.text.contains(SERIALIZED_VAR));

        let receiver_glue =
            emit_network_glue(&program, &plan, &plan.federates[1], backend.as_ref()).unwrap();
        assert!(receiver_glue.text.contains("receive_network_message_0"));
        assert!(receiver_glue.text.contains(DESERIALIZED_VAR));
        assert!(receiver_glue.text.contains("lf_set(receiver.inp"));
    }

    #[test]
    fn unsupported_serializer_fails_glue_emission_with_context() {
        let program = federated_program(Target::C, SerializerKind::Proto);
        let plan = partition(&program).unwrap();
        let backend = backend_for(Target::C).unwrap();

        let err =
            emit_network_glue(&program, &plan, &plan.federates[0], backend.as_ref()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Unsupported serialization"));
        assert!(message.contains("sender.out"), "missing connection context: {message}");
    }

    #[test]
    fn ros2_glue_respects_the_configured_compiler() {
        let mut program = federated_program(Target::C, SerializerKind::Ros2);
        let plan = partition(&program).unwrap();
        let backend = backend_for(Target::C).unwrap();

        // Default compiler is cc, so the strategy is incompatible.
        assert!(emit_network_glue(&program, &plan, &plan.federates[0], backend.as_ref()).is_err());

        program.target_properties.compiler = Some("g++".to_string());
        let glue =
            emit_network_glue(&program, &plan, &plan.federates[0], backend.as_ref()).unwrap();
        assert!(glue.text.contains("rclcpp::SerializedMessage"));
    }
}
