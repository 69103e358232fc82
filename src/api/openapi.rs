use utoipa::{
    openapi::{Contact, InfoBuilder, License},
    OpenApi,
};

use super::handlers::{admin, health, redirect};
use crate::{admin::AdminUserParams, error::ErrorBody, models::User};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        admin::list_users,
        admin::create_user,
        admin::get_user,
        admin::update_user,
        admin::delete_user,
        redirect::redirect,
    ),
    components(schemas(User, AdminUserParams, ErrorBody, admin::UserList, health::Health)),
    tags(
        (name = "admin", description = "Audit-logged user administration"),
        (name = "health", description = "Liveness and database status"),
        (name = "redirect", description = "Open-redirect-safe post-auth redirects")
    )
)]
struct ApiDoc;

/// `OpenAPI` document served at `/api-docs/openapi.json`, with info taken
/// from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact();
    info.license = cargo_license();
    doc.info = info;

    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match (author.find('<'), author.rfind('>')) {
        (Some(start), Some(end)) if start < end => {
            let name = optional_str(author[..start].trim());
            let email = optional_str(author[start + 1..end].trim());
            (name, email)
        }
        _ => (optional_str(author), None),
    }
}

fn optional_str(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
