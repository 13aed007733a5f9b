//! # Caller Context Injection
//!
//! The telephony provider hands the gateway a base64 custom parameter at
//! call start containing whatever the backing record store knew about the
//! caller. This module decodes that blob once per session and renders it
//! into the priming statement the AI session receives before any caller
//! audio is forwarded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lender and vehicle-package counts for a single claim on file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimSummary {
    #[serde(default)]
    pub lender_count: u32,
    #[serde(default)]
    pub vehicle_package_count: u32,
}

/// What the record store resolved for the calling number.
///
/// Immutable after decode; read by the priming renderer and by the tool
/// bridge so the AI is never told to re-ask for details already on file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerContext {
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub id_document_on_file: bool,
    #[serde(default)]
    pub claim_count: u32,
    #[serde(default)]
    pub claims: Vec<ClaimSummary>,
    #[serde(default)]
    pub account_status: Option<String>,
}

/// Decode the base64 caller-context parameter delivered in the telephony
/// `start` event. Anything undecodable yields `None`; a missing context
/// must never fail the call.
pub fn decode_caller_context(blob: &str) -> Option<CallerContext> {
    let bytes = BASE64.decode(blob.trim().as_bytes()).ok()?;
    match serde_json::from_slice::<CallerContext>(&bytes) {
        Ok(context) => Some(context),
        Err(err) => {
            debug!(error = %err, "caller context parameter did not parse as JSON");
            None
        }
    }
}

/// Render the priming statement sent to the AI before any caller audio.
///
/// With a resolved caller this covers identity, document status, the claim
/// summary, and account status. Without one it falls back to a reduced
/// statement carrying only the originating number. Either way the AI is
/// told not to ask for the caller's phone number, which is already known
/// from the call itself.
pub fn render_priming(context: Option<&CallerContext>) -> String {
    let Some(ctx) = context else {
        return "No caller record was available for this call. Greet the caller, ask for \
                their full name, and verify their details before discussing any claim."
            .to_string();
    };

    let number = ctx.phone_number.as_deref().unwrap_or("an unknown number");

    if !ctx.found {
        return format!(
            "The caller is phoning from {number} and could not be matched to an existing \
             account. Greet them, ask for their full name, and offer to look them up. Do \
             not ask for their phone number; it is already known from this call."
        );
    }

    let name = ctx.full_name.as_deref().unwrap_or("the caller");
    let document = if ctx.id_document_on_file {
        "Their identity document is already on file"
    } else {
        "They have not yet provided an identity document"
    };
    let status = ctx.account_status.as_deref().unwrap_or("unknown");

    let mut statement = format!(
        "You are speaking with {name}, calling from {number}. {document}. They have \
         {count} claim(s) on record",
        count = ctx.claim_count,
    );
    for (index, claim) in ctx.claims.iter().enumerate() {
        statement.push_str(&format!(
            "; claim {n} covers {lenders} lender(s) and {packages} vehicle package(s)",
            n = index + 1,
            lenders = claim.lender_count,
            packages = claim.vehicle_package_count,
        ));
    }
    statement.push_str(&format!(
        ". Their account status is {status}. Do not ask for their phone number; it is \
         already known from this call."
    ));
    statement
}
