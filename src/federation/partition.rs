use super::{Federate, FederationPlan, NetworkConnection};
use crate::model::ProgramModel;
use ahash::AHashMap;
use anyhow::{Result, anyhow};

/// Carve a validated federated program into one federate per top-level
/// instantiation of the federated main reactor.
///
/// Same-federate connections are kept untouched inside their fragment; every
/// connection crossing a federate boundary becomes a [`NetworkConnection`].
/// Federate fragments share immutable reactor definitions via handles, so no
/// mutable reactor state is ever aliased between federates.
pub fn partition(program: &ProgramModel) -> Result<FederationPlan> {
    if !program.federated {
        return Err(anyhow!("Program '{}' is not marked federated", program.name));
    }
    let main = program.main_reactor().ok_or_else(|| {
        anyhow!(
            "Program '{}' is marked federated but its main reactor cannot be resolved",
            program.name
        )
    })?;
    if main.instantiations.is_empty() {
        return Err(anyhow!(
            "Federated main reactor '{}' contains no federate instantiations",
            main.name
        ));
    }

    // Duplicate top-level names are disambiguated by the instantiation's
    // position in the main reactor's instantiation list.
    let mut name_counts: AHashMap<&str, usize> = AHashMap::new();
    for instantiation in &main.instantiations {
        *name_counts.entry(instantiation.name.as_str()).or_default() += 1;
    }

    let mut federates = vec![];
    let mut by_instance: AHashMap<&str, Vec<usize>> = AHashMap::new();
    for (index, instantiation) in main.instantiations.iter().enumerate() {
        let name = if name_counts[instantiation.name.as_str()] > 1 {
            format!("{}_{index}", instantiation.name)
        } else {
            instantiation.name.clone()
        };
        let mut reactors: Vec<_> = program
            .reachable_reactors(instantiation.reactor)
            .into_iter()
            .collect();
        reactors.sort_by_key(|id| id.0);
        by_instance
            .entry(instantiation.name.as_str())
            .or_default()
            .push(index);
        federates.push(Federate {
            name,
            index,
            instantiation: instantiation.clone(),
            reactors,
            intra_connections: vec![],
            outbound: vec![],
            inbound: vec![],
        });
    }

    // Connections reference instantiations by name; a name shared by several
    // federates cannot be routed and is rejected rather than guessed at.
    let resolve = |port_ref: &crate::model::PortRef, end: &str| -> Result<usize> {
        match by_instance
            .get(port_ref.instance.as_str())
            .map(Vec::as_slice)
        {
            Some([index]) => Ok(*index),
            Some(indices) => Err(anyhow!(
                "Connection {end} '{port_ref}' is ambiguous: {} federates are named '{}'",
                indices.len(),
                port_ref.instance
            )),
            None => Err(anyhow!(
                "Connection {end} '{port_ref}' does not name a federate instantiation"
            )),
        }
    };

    let mut network = vec![];
    for connection in &main.connections {
        let source_federate = resolve(&connection.source, "source")?;
        let sink_federate = resolve(&connection.sink, "sink")?;

        if source_federate == sink_federate {
            federates[source_federate]
                .intra_connections
                .push(connection.clone());
            continue;
        }

        let serial = network.len();
        network.push(NetworkConnection {
            serial,
            source_federate,
            sink_federate,
            source: connection.source.clone(),
            sink: connection.sink.clone(),
            value_type: connection.value_type.clone(),
            serializer: connection.serializer,
        });
        federates[source_federate].outbound.push(serial);
        federates[sink_federate].inbound.push(serial);
    }

    Ok(FederationPlan {
        program: program.name.clone(),
        federates,
        network,
    })
}
