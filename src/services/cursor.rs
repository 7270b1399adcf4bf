use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::MapErr;
use futures::{Stream, TryStreamExt};
use mongodb::Cursor;

use crate::models::User;
use crate::utils::error::StoreError;
use crate::utils::guard::{CallGuard, GuardedStream};

type DriverUsers = MapErr<Cursor<User>, fn(mongodb::error::Error) -> StoreError>;

/// Server-side cursor over the users collection.
///
/// Every read, through the `Stream` impl or the helpers below, runs under the
/// store's deadline and cancellation token. Dropping it (after draining, on an
/// early `break`, or on an error path) releases the server cursor.
pub struct UserCursor {
    inner: GuardedStream<DriverUsers>,
}

impl UserCursor {
    pub(crate) fn new(cursor: Cursor<User>, guard: &CallGuard) -> Self {
        let users: DriverUsers = cursor.map_err(StoreError::from_cursor as fn(_) -> _);
        Self {
            inner: guard.guard_stream("cursor_next", users),
        }
    }

    pub async fn next_user(&mut self) -> Result<Option<User>, StoreError> {
        self.try_next().await
    }

    /// Drains the cursor. Stops at the first failing document.
    pub async fn collect_users(self) -> Result<Vec<User>, StoreError> {
        self.try_collect().await
    }

    /// Releases the server cursor without reading the rest.
    pub fn close(self) {
        drop(self);
    }
}

impl Stream for UserCursor {
    type Item = Result<User, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for UserCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCursor")
            .field("inner", &self.inner)
            .finish()
    }
}
