//! Bluetooth socket plumbing on top of the Linux BlueZ socket family.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::libc;
use nix::sys::socket::{MsgFlags, getsockopt, recv, send, sockopt};
use tokio::io::unix::AsyncFd;
use tracing::trace;

use super::hci::{HCI_EVENT_PKT, LE_META_EVENT};
use crate::error::ConnectionError;
use crate::hw::model::{AddressType, DeviceAddress};

const BTPROTO_L2CAP: libc::c_int = 0;
const BTPROTO_HCI: libc::c_int = 1;
const SOL_HCI: libc::c_int = 0;
const HCI_FILTER: libc::c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const ATT_CID: u16 = 0x0004;
const BDADDR_LE_PUBLIC: u8 = 0x01;
const BDADDR_LE_RANDOM: u8 = 0x02;

#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn set_packet_type(&mut self, packet_type: u8) {
        self.type_mask |= 1 << (packet_type & 31);
    }

    fn set_event(&mut self, event: u8) {
        self.event_mask[usize::from(event >> 5)] |= 1 << (event & 31);
    }
}

/// A nonblocking Bluetooth socket registered with the tokio reactor.
///
/// The descriptor is closed when the value is dropped.
#[derive(Debug)]
pub(crate) struct BluetoothSocket {
    fd: AsyncFd<OwnedFd>,
}

impl BluetoothSocket {
    /// Opens a raw HCI socket on adapter `device` that only passes LE meta events.
    pub(crate) fn hci(device: u16) -> Result<Self, ConnectionError> {
        let fd = open(libc::SOCK_RAW, BTPROTO_HCI)?;

        let address = SockaddrHci {
            hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: device,
            hci_channel: HCI_CHANNEL_RAW,
        };
        // SAFETY: `address` is a properly initialised sockaddr_hci that outlives the call.
        let bound = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&raw const address).cast::<libc::sockaddr>(),
                size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        if bound < 0 {
            return Err(ConnectionError::socket("bind", Errno::last()));
        }

        let mut filter = HciFilter::default();
        filter.set_packet_type(HCI_EVENT_PKT);
        filter.set_event(LE_META_EVENT);
        // SAFETY: `filter` has the kernel's hci_filter layout and outlives the call.
        let filtered = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                (&raw const filter).cast::<libc::c_void>(),
                size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        if filtered < 0 {
            return Err(ConnectionError::socket("setsockopt", Errno::last()));
        }

        trace!(device, "opened HCI control socket");
        Self::register(fd)
    }

    /// Connects a sequenced-packet L2CAP socket to the peer's fixed ATT channel.
    pub(crate) async fn l2cap(
        peer: DeviceAddress,
        address_type: AddressType,
    ) -> Result<Self, ConnectionError> {
        let fd = open(libc::SOCK_SEQPACKET, BTPROTO_L2CAP)?;

        let address = SockaddrL2 {
            l2_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: 0,
            l2_bdaddr: peer.to_wire(),
            l2_cid: ATT_CID.to_le(),
            l2_bdaddr_type: match address_type {
                AddressType::Public => BDADDR_LE_PUBLIC,
                AddressType::Random => BDADDR_LE_RANDOM,
            },
        };
        // SAFETY: `address` is a properly initialised sockaddr_l2 that outlives the call.
        let connected = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                (&raw const address).cast::<libc::sockaddr>(),
                size_of::<SockaddrL2>() as libc::socklen_t,
            )
        };
        let errno = (connected < 0).then(Errno::last);
        let socket = Self::register(fd)?;
        match errno {
            None => return Ok(socket),
            Some(Errno::EINPROGRESS) => {}
            Some(errno) => return Err(ConnectionError::socket("connect", errno)),
        }

        // Writable once the link is up or the attempt failed; SO_ERROR tells which.
        socket.fd.writable().await?.clear_ready();
        let pending = getsockopt(socket.fd.get_ref(), sockopt::SocketError)
            .map_err(|source| ConnectionError::socket("getsockopt", source))?;
        if pending != 0 {
            return Err(ConnectionError::socket("connect", Errno::from_raw(pending)));
        }

        trace!(%peer, %address_type, "L2CAP ATT channel connected");
        Ok(socket)
    }

    /// Fails unless the kernel can create both socket kinds this driver uses.
    pub(crate) fn probe() -> Result<(), ConnectionError> {
        open(libc::SOCK_RAW, BTPROTO_HCI)?;
        open(libc::SOCK_SEQPACKET, BTPROTO_L2CAP)?;
        Ok(())
    }

    /// Sends one whole frame.
    pub(crate) async fn send(&self, frame: &[u8]) -> io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            let sent = guard.try_io(|inner| {
                Ok(send(inner.as_raw_fd(), frame, MsgFlags::empty())?)
            });
            match sent {
                Ok(Ok(written)) if written == frame.len() => return Ok(()),
                Ok(Ok(written)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("sent {written} of {} bytes", frame.len()),
                    ));
                }
                Ok(Err(error)) => return Err(error),
                Err(_would_block) => {}
            }
        }
    }

    /// Receives one frame into `buffer`, returning its length.
    pub(crate) async fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| Ok(recv(inner.as_raw_fd(), buffer, MsgFlags::empty())?)) {
                Ok(result) => return result,
                Err(_would_block) => {}
            }
        }
    }

    fn register(fd: OwnedFd) -> Result<Self, ConnectionError> {
        // SAFETY: the `OwnedFd` is moved into the `AsyncFd`, which keeps it open and
        // returns the same descriptor until it is dropped.
        let fd = unsafe { AsyncFd::register(fd) }.map_err(io::Error::from)?;
        Ok(Self { fd })
    }
}

fn open(kind: libc::c_int, protocol: libc::c_int) -> Result<OwnedFd, ConnectionError> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let raw: RawFd = unsafe {
        libc::socket(
            libc::AF_BLUETOOTH,
            kind | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            protocol,
        )
    };
    if raw < 0 {
        return Err(ConnectionError::socket("socket", Errno::last()));
    }
    // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}
