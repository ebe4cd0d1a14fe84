use super::FederationPlan;
use crate::generate::artifact::{CodeBuilder, CodeMap};
use anyhow::{Result, anyhow};
use serde::Serialize;

/// Default port the coordination service listens on. Structural placeholder;
/// the launcher resolves the real endpoints at start time.
pub const COORDINATOR_PORT: u16 = 15045;
const FEDERATE_BASE_PORT: u16 = 15046;

#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct FederateEntry {
    pub name: String,
    pub executable: String,
    pub endpoint: Endpoint,
    /// Serials of network connections this federate sends on / listens to.
    pub outbound: Vec<usize>,
    pub inbound: Vec<usize>,
}

/// Enumerates all federates of one program, their executables, and the
/// connectivity needed to start them together.
#[derive(Debug, Serialize)]
pub struct LauncherDescriptor {
    pub program: String,
    pub coordinator: Endpoint,
    pub federates: Vec<FederateEntry>,
}

pub fn descriptor(plan: &FederationPlan) -> Result<LauncherDescriptor> {
    let federates = plan
        .federates
        .iter()
        .map(|federate| {
            let port = usize::from(FEDERATE_BASE_PORT)
                .checked_add(federate.index)
                .and_then(|port| u16::try_from(port).ok())
                .ok_or_else(|| {
                    anyhow!(
                        "Cannot assign a distinct port to federate '{}': port range exhausted",
                        federate.name
                    )
                })?;
            Ok(FederateEntry {
                name: federate.name.clone(),
                executable: federate.executable(&plan.program),
                endpoint: Endpoint {
                    host: "localhost".to_string(),
                    port,
                },
                outbound: federate.outbound.clone(),
                inbound: federate.inbound.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(LauncherDescriptor {
        program: plan.program.clone(),
        coordinator: Endpoint {
            host: "localhost".to_string(),
            port: COORDINATOR_PORT,
        },
        federates,
    })
}

pub fn descriptor_code_map(descriptor: &LauncherDescriptor) -> Result<CodeMap> {
    let mut code = CodeBuilder::new();
    code.pr(serde_json::to_string_pretty(descriptor)?);
    Ok(code.build("launcher.json"))
}

/// Shell script that starts the coordination service and every federate
/// process, then waits for all of them.
pub fn launch_script(descriptor: &LauncherDescriptor) -> CodeMap {
    let mut code = CodeBuilder::new();
    code.pr("#!/usr/bin/env bash");
    code.pr(format!("# Launcher for {} -- generated, do not edit.", descriptor.program));
    code.pr("set -euo pipefail");
    code.blank();
    code.pr(format!(
        "COORDINATOR_HOST=\"${{RHEA_COORDINATOR_HOST:-{}}}\"",
        descriptor.coordinator.host
    ));
    code.pr(format!(
        "COORDINATOR_PORT=\"${{RHEA_COORDINATOR_PORT:-{}}}\"",
        descriptor.coordinator.port
    ));
    code.blank();
    code.pr(format!(
        "rhea-coordinator --port \"$COORDINATOR_PORT\" --federates {} &",
        descriptor.federates.len()
    ));
    code.pr("COORDINATOR_PID=$!");
    code.blank();
    code.pr("PIDS=()");
    for federate in &descriptor.federates {
        code.pr(format!(
            "./federate__{}/{} --coordinator \"$COORDINATOR_HOST:$COORDINATOR_PORT\" --listen {} &",
            federate.name, federate.executable, federate.endpoint.port
        ));
        code.pr("PIDS+=($!)");
    }
    code.blank();
    code.pr("for pid in \"${PIDS[@]}\"; do wait \"$pid\"; done");
    code.pr("wait \"$COORDINATOR_PID\"");
    code.build("launch.sh")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::partition::partition;
    use crate::model::test_fixtures::federated_program;
    use crate::serialization::SerializerKind;
    use crate::target::Target;

    #[test]
    fn descriptor_enumerates_all_federates_with_distinct_ports() {
        let program = federated_program(Target::C, SerializerKind::Native);
        let plan = partition(&program).unwrap();
        let descriptor = descriptor(&plan).unwrap();

        assert_eq!(descriptor.federates.len(), 2);
        assert_ne!(
            descriptor.federates[0].endpoint.port,
            descriptor.federates[1].endpoint.port
        );
        assert_eq!(descriptor.federates[0].executable, "fed_sender");
    }

    #[test]
    fn descriptor_serializes_to_json() {
        let program = federated_program(Target::C, SerializerKind::Native);
        let plan = partition(&program).unwrap();
        let map = descriptor_code_map(&descriptor(&plan).unwrap()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&map.text).unwrap();
        assert_eq!(parsed["program"], "Fed");
        assert_eq!(parsed["federates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn launch_script_starts_coordinator_and_every_federate() {
        let program = federated_program(Target::C, SerializerKind::Native);
        let plan = partition(&program).unwrap();
        let script = launch_script(&descriptor(&plan).unwrap());

        assert!(script.text.starts_with("#!/usr/bin/env bash"));
        assert!(script.text.contains("rhea-coordinator"));
        assert!(script.text.contains("./federate__sender/fed_sender"));
        assert!(script.text.contains("./federate__receiver/fed_receiver"));
    }

    #[test]
    fn port_range_exhaustion_is_an_error() {
        let program = federated_program(Target::C, SerializerKind::Native);
        let mut plan = partition(&program).unwrap();
        plan.federates[1].index = 60_000;

        let err = descriptor(&plan).unwrap_err();
        assert!(err.to_string().contains("port range exhausted"));
    }
}
