//! HTML pages and API documentation.
//!
//! Templates come from a [`TemplateSource`]: either compiled into the binary
//! ([`EmbeddedSource`]) or read from a directory on every render
//! ([`DirectorySource`]), which lets the pages be edited without a rebuild.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use minijinja::Environment;
use serde::Serialize;
use thiserror::Error;

pub const UI_TEMPLATE: &str = "ui.html";
pub const LOGS_TEMPLATE: &str = "logs.html";
pub const NOT_FOUND_TEMPLATE: &str = "404.html";
pub const SWAGGER_TEMPLATE: &str = "swagger.html";
pub const REDOC_TEMPLATE: &str = "redoc.html";

/// The OpenAPI document served at `/swagger/openapi.yaml`.
pub const OPENAPI_SPEC: &str = include_str!("../../api/openapi.yaml");

const EMBEDDED: &[(&str, &str)] = &[
    (UI_TEMPLATE, include_str!("../../templates/ui.html")),
    (LOGS_TEMPLATE, include_str!("../../templates/logs.html")),
    (NOT_FOUND_TEMPLATE, include_str!("../../templates/404.html")),
    (SWAGGER_TEMPLATE, include_str!("../../templates/swagger.html")),
    (REDOC_TEMPLATE, include_str!("../../templates/redoc.html")),
];

/// `info.title` of the OpenAPI document.
pub fn api_title() -> &'static str {
    info_title(OPENAPI_SPEC).unwrap_or("Greetd API")
}

/// Finds `title` among the direct children of the top-level `info:` block.
fn info_title(doc: &str) -> Option<&str> {
    doc.lines()
        .skip_while(|line| line.trim_end() != "info:")
        .skip(1)
        .take_while(|line| line.trim().is_empty() || line.starts_with(' '))
        .find_map(|line| line.strip_prefix("  title:"))
        .map(|title| title.trim().trim_matches(&['"', '\''][..]))
        .filter(|title| !title.is_empty())
}

/// Where page templates are read from.
pub trait TemplateSource: Send + Sync {
    fn load(&self, name: &str) -> io::Result<Cow<'static, str>>;
}

/// Templates compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSource;

impl TemplateSource for EmbeddedSource {
    fn load(&self, name: &str) -> io::Result<Cow<'static, str>> {
        EMBEDDED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, text)| Cow::Borrowed(*text))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no embedded template named {name}"),
                )
            })
    }
}

/// Templates read from `<root>/<name>` each time they are rendered.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateSource for DirectorySource {
    fn load(&self, name: &str) -> io::Result<Cow<'static, str>> {
        fs::read_to_string(self.root.join(name)).map(Cow::Owned)
    }
}

#[derive(Error, Debug)]
pub enum PageError {
    #[error("failed to load template {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to render template {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Renders named templates with HTML auto-escaping.
#[derive(Clone)]
pub struct Pages {
    source: Arc<dyn TemplateSource>,
}

impl Pages {
    pub fn new<S: TemplateSource + 'static>(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    pub fn embedded() -> Self {
        Self::new(EmbeddedSource)
    }

    pub fn render<C: Serialize>(&self, name: &str, ctx: C) -> Result<String, PageError> {
        let text = self.source.load(name).map_err(|source| PageError::Load {
            name: name.to_string(),
            source,
        })?;

        let render_err = |source: minijinja::Error| PageError::Render {
            name: name.to_string(),
            source,
        };
        let env = Environment::new();
        let template = env.template_from_named_str(name, &text).map_err(render_err)?;
        template.render(ctx).map_err(render_err)
    }
}

impl Default for Pages {
    fn default() -> Self {
        Self::embedded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;
    use tempfile::tempdir;

    #[test]
    fn test_every_embedded_template_renders() {
        let pages = Pages::embedded();
        for (name, _) in EMBEDDED {
            let html = pages
                .render(
                    name,
                    context! { message => "m", logs => vec!["l"], path => "/p", title => "t" },
                )
                .unwrap();
            assert!(html.contains("<!DOCTYPE html>"), "{name}");
        }
    }

    #[test]
    fn test_ui_escapes_message() {
        let html = Pages::embedded()
            .render(UI_TEMPLATE, context! { message => "<script>alert(1)</script>" })
            .unwrap();

        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_directory_source_reads_on_each_render() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(UI_TEMPLATE);
        let pages = Pages::new(DirectorySource::new(dir.path()));

        fs::write(&path, "first {{ message }}").unwrap();
        assert_eq!(pages.render(UI_TEMPLATE, context! { message => "a" }).unwrap(), "first a");

        fs::write(&path, "second {{ message }}").unwrap();
        assert_eq!(pages.render(UI_TEMPLATE, context! { message => "b" }).unwrap(), "second b");
    }

    #[test]
    fn test_missing_template_is_load_error() {
        let dir = tempdir().unwrap();
        let pages = Pages::new(DirectorySource::new(dir.path()));

        let res = pages.render(UI_TEMPLATE, context! {});
        assert!(matches!(res, Err(PageError::Load { .. })));
        assert!(EmbeddedSource.load("nope.html").is_err());
    }

    #[test]
    fn test_broken_template_is_render_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(UI_TEMPLATE), "{% for %}").unwrap();

        let res = Pages::new(DirectorySource::new(dir.path())).render(UI_TEMPLATE, context! {});
        assert!(matches!(res, Err(PageError::Render { .. })));
    }

    #[test]
    fn test_api_title_comes_from_spec() {
        assert_eq!(api_title(), "Greetd API");
    }

    #[test]
    fn test_title_only_read_from_info_block() {
        let doc = "openapi: 3.1.0\n\
                   paths:\n  /x:\n    get:\n      title: Not this one\n\
                   info:\n  version: 1.0.0\n  contact:\n    title: Nor this\n  title: \"Real API\"\n\
                   components:\n  title: Elsewhere\n";
        assert_eq!(info_title(doc), Some("Real API"));

        assert_eq!(info_title("info:\n  version: 1\nschemas:\n  title: Outside\n"), None);
    }
}
