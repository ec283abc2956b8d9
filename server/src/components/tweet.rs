use maud::{html, Markup, Render};

/// Compose form for the authenticated view
pub struct TweetForm {
    pub authenticated: bool,
    pub token_expired: bool,
}

impl Render for TweetForm {
    fn render(&self) -> Markup {
        html! {
            h1 { "Post a tweet" }

            @if self.authenticated {
                @if self.token_expired {
                    p class="notice" {
                        "Your access token has expired. "
                        a href="/refresh" { "Refresh it" }
                        " before posting."
                    }
                }

                form method="post" action="/createtweet" {
                    label for="text" { "What's happening?" }
                    textarea id="text" name="text" rows="4" maxlength="280" required {}
                    button type="submit" { "Tweet" }
                }

                p {
                    a href="/refresh" { "Refresh access token" }
                    " · "
                    a href="/logout" { "Log out" }
                }
            } @else {
                p { "You are not signed in." }
                a href="/" { "Sign in" }
            }
        }
    }
}
