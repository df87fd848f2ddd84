//! Rtnetlink helpers - native netlink operations for veth pairs, link state and addresses

use anyhow::{Context, Result};
use futures::TryStreamExt;
use rtnetlink::{new_connection, Handle};
use std::net::{IpAddr, Ipv4Addr};

fn handle() -> Result<Handle> {
    let (connection, handle, _) = new_connection().context("Failed to open rtnetlink socket")?;
    tokio::spawn(connection);
    Ok(handle)
}

/// Find interface index by name
async fn link_index(handle: &Handle, ifname: &str) -> Result<u32> {
    let mut links = handle.link().get().match_name(ifname.to_string()).execute();
    let link = links
        .try_next()
        .await
        .with_context(|| format!("Interface '{}' not found", ifname))?
        .with_context(|| format!("Interface '{}' not found", ifname))?;
    Ok(link.header.index)
}

/// Create a veth pair
pub async fn create_veth_pair(name: &str, peer_name: &str) -> Result<()> {
    let handle = handle()?;
    handle
        .link()
        .add()
        .veth(name.to_string(), peer_name.to_string())
        .execute()
        .await
        .with_context(|| format!("Failed to create veth pair {} <-> {}", name, peer_name))?;
    Ok(())
}

/// Delete a link; deleting one end of a veth pair removes both ends
pub async fn delete_link(ifname: &str) -> Result<()> {
    let handle = handle()?;
    let ifindex = link_index(&handle, ifname).await?;
    handle
        .link()
        .del(ifindex)
        .execute()
        .await
        .with_context(|| format!("Failed to delete link {}", ifname))?;
    Ok(())
}

/// Set link up
pub async fn link_up(ifname: &str) -> Result<()> {
    let handle = handle()?;
    let ifindex = link_index(&handle, ifname).await?;
    handle
        .link()
        .set(ifindex)
        .up()
        .execute()
        .await
        .with_context(|| format!("Failed to bring link {} up", ifname))?;
    Ok(())
}

/// Add IPv4 address to interface unless it is already assigned
pub async fn ensure_ipv4_address(ifname: &str, addr: Ipv4Addr, prefix: u8) -> Result<()> {
    let handle = handle()?;
    let ifindex = link_index(&handle, ifname).await?;

    let mut existing = handle
        .address()
        .get()
        .set_link_index_filter(ifindex)
        .set_prefix_length_filter(prefix)
        .set_address_filter(IpAddr::V4(addr))
        .execute();
    if existing.try_next().await?.is_some() {
        log::debug!("Address {}/{} already present on {}", addr, prefix, ifname);
        return Ok(());
    }

    handle
        .address()
        .add(ifindex, IpAddr::V4(addr), prefix)
        .execute()
        .await
        .with_context(|| format!("Failed to add address {}/{} to {}", addr, prefix, ifname))?;

    Ok(())
}
