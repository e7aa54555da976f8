use maud::{DOCTYPE, Markup, PreEscaped, html};
use thiserror::Error;

use crate::catalyst::{CatalystError, GlobalNamespace, SanitizedCatalystContext};
use crate::post_parameters::PostParametersInspector;

const SITE_NAME: &str = "MusicBrainz";
const GLOBALS_SCRIPT_ID: &str = "mb-globals";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Catalyst(#[from] CatalystError),
    #[error("failed to serialize component props: {0}")]
    Props(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub enum WebBody {
    Index,
    NotFound {
        heading: String,
        message: String,
    },
    Resubmit {
        action: String,
        inspector: PostParametersInspector,
    },
}

#[derive(Debug, Clone)]
pub struct WebPage {
    pub title: String,
    pub context: SanitizedCatalystContext,
    pub body: WebBody,
}

/// Renders a full document. The page's context is written to the global
/// namespace before any other script runs.
pub fn render_page(page: &WebPage) -> Result<String, RenderError> {
    let globals = GlobalNamespace::new(page.context.clone()).to_globals_script()?;
    let main = render_main(page)?;
    let markup = html! {
        (DOCTYPE)
        html lang=(language_tag(&page.context)) {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (page.title) " - " (SITE_NAME) }
                style { (PreEscaped(styles())) }
                script id=(GLOBALS_SCRIPT_ID) { (PreEscaped(globals)) }
            }
            body {
                div id="page" {
                    (main)
                }
            }
        }
    };

    Ok(markup.into_string())
}

pub fn render_notice_fragment(message: &str) -> String {
    let markup = html! {
        div class="banner error" { p { (message) } }
    };
    markup.into_string()
}

fn render_main(page: &WebPage) -> Result<Markup, RenderError> {
    let markup = match &page.body {
        WebBody::Index => html! {
            h1 { "Welcome to " (SITE_NAME) "!" }
            p { "MusicBrainz is an open music encyclopedia that collects music metadata." }
        },
        WebBody::NotFound { heading, message } => not_found_panel(heading, message),
        WebBody::Resubmit { action, inspector } => resubmit_panel(action, inspector)?,
    };
    Ok(markup)
}

fn not_found_panel(heading: &str, message: &str) -> Markup {
    html! {
        div id="content" class="not-found" {
            h1 { (heading) }
            p { (message) }
        }
    }
}

fn resubmit_panel(action: &str, inspector: &PostParametersInspector) -> Result<Markup, RenderError> {
    let parameters = inspector.render_hydratable()?;
    Ok(html! {
        div id="content" {
            h1 { "Resubmit form" }
            p {
                "The data below was submitted with your last request. "
                "Review it, correct anything that needs changing and submit it again."
            }
            form method="post" action=(action) {
                (parameters)
                button type="submit" { "Submit again" }
            }
        }
    })
}

fn language_tag(context: &SanitizedCatalystContext) -> &str {
    let language = context.stash.current_language.as_str();
    if language.is_empty() { "en" } else { language }
}

fn styles() -> &'static str {
    r#"
body { font-family: "Bitstream Vera Sans", Verdana, Arial, sans-serif; font-size: 12px; }
#page { margin: 0 auto; max-width: 1200px; padding: 1em; }
.banner.error { background: #fcc; border: 1px solid #c00; padding: 0.5em 1em; }
.expand-link { display: inline-block; margin: 0.5em 0; text-decoration: none; }
table.all-collapsed { display: none; }
.post-parameters input[type="text"] { font-family: monospace; }
"#
}
