use salvo::prelude::*;

use crate::web::metrics::format_prometheus;
use crate::web::web_state;

#[handler]
pub async fn metrics(res: &mut Response) {
    let body = match web_state() {
        Some(state) => format_prometheus(
            state.started_at.elapsed().as_secs(),
            Some(state.buffer.pending()),
        ),
        None => format_prometheus(0, None),
    };
    res.render(Text::Plain(body));
}
