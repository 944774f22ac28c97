use axum::http::StatusCode;
use maud::html;

use super::layout::{Page, Panel, Tone};
use super::ui::claims::{ClaimsTable, JsonDump};
use crate::flows::{Authenticated, IdpLogout, LogoutOutcome};

const LINK: &str = "text-indigo-700 underline";

pub fn index_page(ropc_enabled: bool) -> Page {
    let body = html! {
        p class="mb-4" {
            a class=(LINK) href="/login" { "Log in with the identity provider" }
        }
        @if ropc_enabled {
            form method="post" action="/loginext" class="space-y-2 border-t border-slate-200 pt-4" {
                input class="border rounded px-2 py-1 w-full" name="username" placeholder="Username" autocomplete="username";
                input class="border rounded px-2 py-1 w-full" name="password" type="password" placeholder="Password" autocomplete="current-password";
                button class="bg-indigo-700 text-white rounded px-3 py-1" type="submit" { "Log in with password" }
            }
        }
    };

    Page::new("Login", Panel::new("Sign in", Tone::Neutral, body))
}

pub fn authenticated_page(authenticated: &Authenticated, include_tokens: bool) -> Page {
    let tokens = include_tokens
        .then(|| serde_json::to_string_pretty(&authenticated.token_set).ok())
        .flatten();

    let body = html! {
        h2 class="text-lg font-semibold mb-2" { "User info" }
        (ClaimsTable(&authenticated.userinfo))
        @if let Some(tokens) = tokens {
            h2 class="text-lg font-semibold mt-6 mb-2" { "Token set" }
            (JsonDump(tokens))
        }
        a class={ "inline-block mt-6 " (LINK) } href=(authenticated.logout_url) { "Log out" }
    };

    Page::new("Logged in", Panel::new("Logged in", Tone::Success, body).wide())
}

pub fn logout_page(outcome: &LogoutOutcome) -> Page {
    let tone = match outcome.idp_logout {
        IdpLogout::Failed => Tone::Warning,
        IdpLogout::Succeeded | IdpLogout::Skipped => Tone::Neutral,
    };

    let body = html! {
        @if outcome.idp_logout == IdpLogout::Failed {
            p class="mb-4" {
                "Your tokens were revoked, but the identity provider session may still be active."
            }
        }
        a class=(LINK) href="/" { "Back" }
    };

    Page::new("Logged out", Panel::new(outcome.message, tone, body))
}

pub fn error_page(status: StatusCode, message: &str) -> Page {
    let heading = status.canonical_reason().unwrap_or("Error");
    let body = html! {
        p class="mb-4" { (message) }
        a class=(LINK) href="/" { "Back" }
    };

    Page::new("Error", Panel::new(heading, Tone::Error, body))
}
