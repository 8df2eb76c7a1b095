//! Builders for tfplugin6 schemas.

use crate::proto::{
    StringKind,
    schema::{self, nested_block::NestingMode},
    Schema,
};

/// JSON-encoded cty type of a string attribute.
pub const STRING_TYPE: &[u8] = b"\"string\"";

/// Builds a [`schema::Attribute`].
#[derive(Debug, Clone)]
pub struct AttributeBuilder {
    inner: schema::Attribute,
}

impl AttributeBuilder {
    /// A string attribute; optional unless told otherwise.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            inner: schema::Attribute {
                name: name.into(),
                r#type: STRING_TYPE.to_vec(),
                optional: true,
                description_kind: StringKind::Plain.into(),
                ..Default::default()
            },
        }
    }

    /// Must be set in configuration.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.inner.required = true;
        self.inner.optional = false;
        self.inner.computed = false;
        self
    }

    /// Set by the provider only.
    #[must_use]
    pub fn computed(mut self) -> Self {
        self.inner.computed = true;
        self.inner.optional = false;
        self.inner.required = false;
        self
    }

    /// May be set in configuration, otherwise set by the provider.
    #[must_use]
    pub fn optional_computed(mut self) -> Self {
        self.inner.computed = true;
        self.inner.optional = true;
        self.inner.required = false;
        self
    }

    /// Redacted in plan output.
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.inner.sensitive = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    /// Finishes the attribute.
    #[must_use]
    pub fn build(self) -> schema::Attribute {
        self.inner
    }
}

/// Builds a [`schema::Block`].
#[derive(Debug, Clone, Default)]
pub struct BlockBuilder {
    inner: schema::Block,
}

impl BlockBuilder {
    /// An empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: AttributeBuilder) -> Self {
        self.inner.attributes.push(attribute.build());
        self
    }

    /// Adds a nested list block.
    #[must_use]
    pub fn list_block(mut self, name: impl Into<String>, block: Self, max_items: i64) -> Self {
        self.inner.block_types.push(schema::NestedBlock {
            type_name: name.into(),
            block: Some(block.build()),
            nesting: NestingMode::List.into(),
            min_items: 0,
            max_items,
        });
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    /// Finishes the block.
    #[must_use]
    pub fn build(self) -> schema::Block {
        self.inner
    }

    /// Wraps the block in a versioned schema.
    #[must_use]
    pub fn into_schema(self, version: i64) -> Schema {
        Schema {
            version,
            block: Some(self.build()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_flags() {
        let required = AttributeBuilder::string("name").required().build();
        assert!(required.required && !required.optional && !required.computed);
        assert_eq!(required.r#type, STRING_TYPE);

        let computed = AttributeBuilder::string("digest").computed().build();
        assert!(computed.computed && !computed.optional && !computed.required);

        let secret = AttributeBuilder::string("password").sensitive().build();
        assert!(secret.optional && secret.sensitive);

        let id = AttributeBuilder::string("id").optional_computed().build();
        assert!(id.optional && id.computed);
    }

    #[test]
    fn test_list_block() {
        let schema = BlockBuilder::new()
            .attribute(AttributeBuilder::string("name").required())
            .list_block(
                "auth",
                BlockBuilder::new().attribute(AttributeBuilder::string("username")),
                1,
            )
            .into_schema(0);

        let block = schema.block.unwrap();
        assert_eq!(block.attributes.len(), 1);
        let nested = &block.block_types[0];
        assert_eq!(nested.type_name, "auth");
        assert_eq!(nested.nesting, NestingMode::List as i32);
        assert_eq!(nested.max_items, 1);
        assert_eq!(nested.block.as_ref().unwrap().attributes[0].name, "username");
    }
}
