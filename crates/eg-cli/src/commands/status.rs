//! Status command for showing the stored identity of one client.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use eg_core::{ClientId, IdentityKey, Scope};
use eg_store::IdentityDb;

pub fn run<W: Write>(
    writer: &mut W,
    db: &IdentityDb,
    store_path: &Path,
    client: &ClientId,
) -> Result<()> {
    writeln!(writer, "Engagement identity")?;
    writeln!(writer, "Store: {}", store_path.display())?;
    writeln!(writer, "Client: {client}")?;

    let mut persistent = Vec::new();
    let mut session = Vec::new();
    for key in IdentityKey::ALL {
        let Some(value) = db.get_value(key.scope(), &key.key(client))? else {
            continue;
        };
        match key.scope() {
            Scope::Persistent => persistent.push((key.field(), value)),
            Scope::Session => session.push((key.field(), value)),
        }
    }

    if persistent.is_empty() && session.is_empty() {
        writeln!(writer, "No identity stored.")?;
        return Ok(());
    }

    for (title, values) in [("Persistent", persistent), ("Session", session)] {
        if values.is_empty() {
            continue;
        }
        writeln!(writer, "{title}:")?;
        for (field, value) in values {
            writeln!(writer, "- {field}: {value}")?;
        }
    }

    Ok(())
}
