use maud::{html, Markup, Render, DOCTYPE};

const APP_NAME: &str = "OIDC relying party";

/// Full HTML document around a single panel
pub struct Page {
    pub title: String,
    pub panel: Panel,
}

impl Page {
    pub fn new(title: &str, panel: Panel) -> Self {
        Self {
            title: title.to_string(),
            panel,
        }
    }
}

impl Render for Page {
    fn render(&self) -> Markup {
        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    meta name="viewport" content="width=device-width, initial-scale=1.0";
                    title { (self.title) " | " (APP_NAME) }
                    script src="https://unpkg.com/@tailwindcss/browser@4" {}
                }

                body class="min-h-screen bg-slate-100 text-slate-800" {
                    header class="bg-slate-900 text-slate-100 px-6 py-3" {
                        a href="/" class="font-semibold tracking-wide" { (APP_NAME) }
                    }
                    main class="py-10 px-4" {
                        (self.panel)
                    }
                }
            }
        }
    }
}

impl axum::response::IntoResponse for Page {
    fn into_response(self) -> axum::response::Response {
        self.render().into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Success,
    Warning,
    Error,
}

impl Tone {
    fn accent(self) -> &'static str {
        match self {
            Tone::Neutral => "border-slate-400",
            Tone::Success => "border-emerald-500",
            Tone::Warning => "border-amber-500",
            Tone::Error => "border-red-600",
        }
    }
}

/// Titled box with a coloured top border
pub struct Panel {
    pub heading: String,
    pub tone: Tone,
    pub wide: bool,
    pub body: Markup,
}

impl Panel {
    pub fn new(heading: &str, tone: Tone, body: Markup) -> Self {
        Self {
            heading: heading.to_string(),
            tone,
            wide: false,
            body,
        }
    }

    pub fn wide(mut self) -> Self {
        self.wide = true;
        self
    }
}

impl Render for Panel {
    fn render(&self) -> Markup {
        let width = if self.wide { "max-w-3xl" } else { "max-w-md" };

        html! {
            section class={ (width) " mx-auto bg-white rounded-lg shadow border-t-4 " (self.tone.accent()) " px-8 py-6" } {
                h1 class="text-2xl font-bold mb-4" { (self.heading) }
                (self.body)
            }
        }
    }
}
