use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("sfu-lb: fails to open config file")]
    ErrConfigOpen,
    #[error("sfu-lb: fails to read config file")]
    ErrConfigRead,
    #[error("sfu-lb: unmarshal config json: {0}")]
    ErrConfigParse(String),
    #[error("sfu-lb: sfu_list must not be empty")]
    ErrConfigEmptySfuList,
    #[error("sfu-lb: mobility.mode must be 1 or 2")]
    ErrConfigBadMobilityMode,
    #[error("sfu-lb: mobility.mode=2 requires at least two distinct sfu entries")]
    ErrConfigMobilityModeTwoNeedsTwoSfus,
    #[error("sfu-lb: mobility.interval_s must be positive")]
    ErrConfigZeroInterval,
    #[error("sfu-lb: no config file given, use -c/--conf")]
    ErrNoConfigGiven,
    #[error("sfu-lb: listen addr: {0}")]
    ErrBind(IoError),
    #[error("sfu-lb: set socket option on listen addr: {0}")]
    ErrSockopt(IoError),
    #[error("sfu-lb: fail to resolve sfu addr")]
    ErrResolve,
    #[error("sfu-lb: dial udp dst: {0}")]
    ErrDial(IoError),
    #[error("sfu-lb: fail to send to dst")]
    ErrSend,
    #[error("sfu-lb: fail to receive from dst")]
    ErrRecv,
    #[error("sfu-lb: sfu registry has fewer than two distinct entries")]
    ErrNoAlternateSfu,
    #[error("{0}")]
    Io(IoError),
}

/// Workaround for wanting `PartialEq` on an enum that carries an [`io::Error`].
#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
