//! Provider and data source schemas.

use containerregistry_tfplugin::proto::Schema;
use containerregistry_tfplugin::{AttributeBuilder, BlockBuilder};

use crate::config::{
    ADDRESS, AUTH, AUTH_BLOCK, IDENTITY_TOKEN, PASSWORD, REGISTRY_TOKEN, USERNAME,
};

/// Type name of the image data source.
pub const IMAGE_DATA_SOURCE: &str = "containerregistry_image";

/// Image reference attribute.
pub const NAME: &str = "name";
/// Resolved digest attribute.
pub const DIGEST: &str = "digest";
/// Resource identifier attribute.
pub const ID: &str = "id";

fn credential_attributes(block: BlockBuilder) -> BlockBuilder {
    block
        .attribute(AttributeBuilder::string(USERNAME).description("Registry username"))
        .attribute(
            AttributeBuilder::string(AUTH)
                .sensitive()
                .description("Base64 encoded `username:password`"),
        )
        .attribute(
            AttributeBuilder::string(PASSWORD)
                .sensitive()
                .description("Registry password"),
        )
        .attribute(
            AttributeBuilder::string(IDENTITY_TOKEN)
                .sensitive()
                .description("OAuth2 refresh token exchanged for a registry token"),
        )
        .attribute(
            AttributeBuilder::string(REGISTRY_TOKEN)
                .sensitive()
                .description("Bearer token sent to the registry as is"),
        )
}

/// Schema of the `provider "containerregistry"` block.
#[must_use]
pub fn provider_schema() -> Schema {
    let auth = credential_attributes(BlockBuilder::new().attribute(
        AttributeBuilder::string(ADDRESS)
            .required()
            .description(
                "Address of the registry. Docker Hub images match either `index.docker.io` \
                 or `docker.io`",
            ),
    ))
    .description("Credentials for one registry");

    BlockBuilder::new().list_block(AUTH_BLOCK, auth, 0).into_schema(0)
}

/// Schema of the `containerregistry_image` data source.
#[must_use]
pub fn image_schema() -> Schema {
    let auth = credential_attributes(BlockBuilder::new())
        .description("Credentials for this lookup; overrides provider and keychain credentials");

    BlockBuilder::new()
        .attribute(
            AttributeBuilder::string(ID)
                .optional_computed()
                .description("Same as digest"),
        )
        .attribute(
            AttributeBuilder::string(NAME)
                .required()
                .description("Image reference, e.g. `ghcr.io/org/app:1.2.3`"),
        )
        .attribute(
            AttributeBuilder::string(DIGEST)
                .computed()
                .description("Manifest digest of the image, `sha256:...`"),
        )
        .list_block(AUTH_BLOCK, auth, 1)
        .description("Resolves a container image reference to its content digest")
        .into_schema(0)
}
