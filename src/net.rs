//! Transport abstraction over TCP and Unix domain sockets.
use std::io;

/// Either a `TcpStream` or a Unix `UnixStream`, transparently implementing
/// `AsyncRead`/`AsyncWrite`.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = tokio::net::TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        #[cfg(feature = "log")]
        log::debug!("connected via TCP stream: {:?}", socket.local_addr());
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    #[cfg(unix)]
    pub async fn connect_unix(path: &str) -> io::Result<Socket> {
        let socket = tokio::net::UnixStream::connect(path).await?;
        #[cfg(feature = "log")]
        log::debug!("connected via Unix socket: {:?}", socket.peer_addr()?.as_pathname());
        Ok(Socket { kind: Kind::Unix(socket) })
    }

    pub fn poll_shutdown(&mut self, cx: &mut std::task::Context) -> std::task::Poll<io::Result<()>> {
        tokio::io::AsyncWrite::poll_shutdown(std::pin::Pin::new(self), cx)
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await
    }
}

impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> std::task::Poll<io::Result<usize>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write_vectored(cx, bufs),
        }
    }

    #[inline]
    fn is_write_vectored(&self) -> bool {
        true
    }

    #[inline]
    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Kind::Tcp(ref tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(ref unix) => std::fmt::Debug::fmt(unix, f),
        }
    }
}
