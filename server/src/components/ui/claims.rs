use maud::{html, Markup, Render};
use serde_json::Value;

use crate::oidc::UserInfo;

/// Userinfo claims as a two-column table. String claims are shown bare,
/// anything else as compact JSON.
pub struct ClaimsTable<'a>(pub &'a UserInfo);

impl Render for ClaimsTable<'_> {
    fn render(&self) -> Markup {
        html! {
            @if self.0.claims().next().is_none() {
                p class="text-slate-500 italic" { "The provider returned no claims." }
            } @else {
                table class="w-full text-sm" {
                    @for (name, value) in self.0.claims() {
                        tr class="border-b border-slate-100" {
                            th class="font-mono text-left pr-4 py-1 align-top" { (name) }
                            td class="break-all py-1" {
                                @match value {
                                    Value::String(text) => { (text) }
                                    other => { code { (other) } }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Pretty-printed JSON block
pub struct JsonDump(pub String);

impl Render for JsonDump {
    fn render(&self) -> Markup {
        html! {
            pre class="bg-slate-900 text-slate-100 text-xs p-3 rounded overflow-x-auto" { (self.0) }
        }
    }
}
