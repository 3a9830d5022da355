/// Sends a request to an actor and awaits its response.
///
/// Expects `Request`, `Response`, `oneshot`, `SinkExt` and `ShutDown` to be
/// in scope at the call site and `$self.sender` to be the actor's
/// `mpsc::Sender`.
#[doc(hidden)]
#[macro_export]
macro_rules! dispatch_req {
    ($self:ident, $name:ident) => {{
        let req = Request::$name;

        $crate::dispatch_req!(@send $self, $name, req)
    }};

    ($self:ident, $name:ident, $args:tt) => {{
        let req = Request::$name $args;

        $crate::dispatch_req!(@send $self, $name, req)
    }};

    (@send $self:ident, $name:ident, $req:ident) => {{
        let (s, r) = oneshot::channel();

        let mut sender = $self.sender.clone();

        async move {
            sender.send(($req, s)).await.map_err(|_| ShutDown)?;

            match r.await.map_err(|_| ShutDown)? {
                Response::$name(r) => Ok(r?),
                _ => unreachable!(),
            }
        }
    }};
}
