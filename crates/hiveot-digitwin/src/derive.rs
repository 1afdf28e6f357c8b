// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Digital-twin TD derivation.

use crate::error::{Result, StoreError};
use hiveot_messaging::{is_digitwin_id, make_digitwin_id, FormProvider, ThingDescription};
use serde_json::{Map, Value};

/// Derive the consumer-facing TD from the TD an agent published.
///
/// The id is re-scoped to `dtw:{agent}:{thing}`, the agent's forms and
/// security scheme are replaced by those of the hub, and all affordances
/// and schemas are kept as is.
pub fn derive_digitwin_td(
    agent_id: &str,
    agent_td: &ThingDescription,
    forms: &dyn FormProvider,
) -> Result<ThingDescription> {
    validate_agent_td(agent_id, agent_td)?;

    let mut dtd = agent_td.clone();
    dtd.id = make_digitwin_id(agent_id, &agent_td.id);
    dtd.strip_forms();
    dtd.base.clear();
    dtd.security_definitions = Map::new();
    dtd.security = Value::Null;
    forms.add_forms(&mut dtd);
    Ok(dtd)
}

fn validate_agent_td(agent_id: &str, td: &ThingDescription) -> Result<()> {
    if agent_id.is_empty() {
        return Err(StoreError::Invalid("missing agent ID".into()));
    }
    if td.id.is_empty() {
        return Err(StoreError::Invalid("TD has no id".into()));
    }
    if is_digitwin_id(&td.id) {
        return Err(StoreError::Invalid(format!(
            "agent '{}' published a digital twin ID '{}'",
            agent_id, td.id
        )));
    }
    Ok(())
}
