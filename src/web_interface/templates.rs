use log::debug;
use minijinja::{context, Environment};
use rust_embed::RustEmbed;

use crate::error_handling::types::WebError;

pub const GALLERY_TEMPLATE: &str = "gallery.html";
pub const START_TEMPLATE: &str = "start.html";

#[derive(RustEmbed)]
#[folder = "templates/"]
struct TemplateAssets;

/// HTML pages, compiled once at startup from the embedded `templates/` folder.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn load() -> Result<Self, WebError> {
        let mut env = Environment::new();
        for name in TemplateAssets::iter() {
            let file = TemplateAssets::get(&name)
                .ok_or_else(|| WebError::Template(format!("embedded template {} vanished", name)))?;
            let source = String::from_utf8(file.data.into_owned())
                .map_err(|e| WebError::Template(format!("{}: {}", name, e)))?;
            env.add_template_owned(name.to_string(), source)
                .map_err(|e| WebError::Template(e.to_string()))?;
            debug!("Loaded template {}", name);
        }

        for required in [GALLERY_TEMPLATE, START_TEMPLATE] {
            env.get_template(required)
                .map_err(|e| WebError::Template(e.to_string()))?;
        }
        Ok(Self { env })
    }

    /// Gallery page bound to the push channel behind `token`.
    pub fn gallery(&self, token: &str) -> Result<String, WebError> {
        self.render(GALLERY_TEMPLATE, context! { token })
    }

    pub fn start(&self) -> Result<String, WebError> {
        self.render(START_TEMPLATE, context! {})
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, WebError> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(|e| WebError::Template(format!("{}: {}", name, e)))
    }
}
