use maud::{html, Markup, Render, DOCTYPE};

pub struct Page {
    pub title: String,
    pub content: Box<dyn Render>,
}

impl Render for Page {
    fn render(&self) -> Markup {
        html! {
            (DOCTYPE)
            head {
                title { (self.title) }
                meta name="viewport" content="width=device-width, initial-scale=1.0";
            }

            div class="page" {
                (self.content.render())
            }
        }
    }
}

impl axum::response::IntoResponse for Page {
    fn into_response(self) -> axum::response::Response {
        self.render().into_response()
    }
}

pub struct Card {
    pub content: Box<dyn Render>,
}

impl Card {
    pub fn new(content: impl Render + 'static) -> Self {
        Self {
            content: Box::new(content),
        }
    }
}

impl Render for Card {
    fn render(&self) -> Markup {
        html! {
            div class="card" {
                (self.content.render())
            }
        }
    }
}
