//! Expansion of token-valued tag attributes.

use super::{Expander, OutputType};
use crate::tokens::{AttrValue, Attribute};

/// Expands attribute keys and values which contain unexpanded tokens, such
/// as `<div class="{{foo}}">`.
#[derive(Debug)]
pub(crate) struct AttributeTransformManager {
    /// The expansion capability of the owning pipeline.
    expander: Expander,
}

impl AttributeTransformManager {
    /// Creates a new manager expanding in the expander’s frame.
    pub fn new(expander: Expander) -> Self {
        Self { expander }
    }

    /// Expands every attribute to plain text. Plain attributes are returned
    /// unchanged.
    pub async fn process(&self, attrs: Vec<Attribute>) -> Vec<Attribute> {
        let mut out = Vec::with_capacity(attrs.len());
        for attr in attrs {
            let k = self.expand(attr.k).await;
            let v = self.expand(attr.v).await;
            out.push(Attribute { k, v, ..attr });
        }
        out
    }

    /// Expands one key or value.
    async fn expand(&self, value: AttrValue) -> AttrValue {
        if !value.needs_expansion() {
            return match value {
                AttrValue::Tokens(tokens) => AttrValue::from_tokens(tokens),
                text => text,
            };
        }

        let tokens = value.into_tokens();
        let expanded = self
            .expander
            .frame
            .expand(&self.expander.env, tokens, OutputType::Text)
            .await;
        AttrValue::Text(expanded.into_text())
    }
}

