//! page/checksum — CRC32 страниц документов.
//!
//! Контрольная сумма лежит в заголовке slotted-страницы (offset 12) и
//! считается по всему образу с обнулённым полем checksum. Страницы B+-дерева
//! и overflow-страницы поля checksum не имеют.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::SP_OFF_CHECKSUM;
use crate::errors::{GaldrError, Result};

/// CRC32 образа slotted-страницы (поле checksum считается нулевым).
pub fn slotted_checksum(page: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(&page[..SP_OFF_CHECKSUM]);
    h.update(&[0u8; 4]);
    h.update(&page[SP_OFF_CHECKSUM + 4..]);
    h.finalize()
}

/// Пересчитать и записать checksum (вызывается перед сбросом страницы на диск).
pub fn page_update_checksum(page: &mut [u8]) {
    let sum = slotted_checksum(page);
    LittleEndian::write_u32(&mut page[SP_OFF_CHECKSUM..], sum);
}

/// Проверить checksum; Corruption при расхождении.
pub fn page_verify_checksum(page: &[u8], page_id: u32) -> Result<()> {
    let stored = LittleEndian::read_u32(&page[SP_OFF_CHECKSUM..]);
    let computed = slotted_checksum(page);
    if stored != computed {
        return Err(GaldrError::corruption(format!(
            "checksum mismatch on page {} (stored {:#010x}, computed {:#010x})",
            page_id, stored, computed
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_detects_flip() {
        let mut page = vec![0u8; 4096];
        page[0] = 1;
        page[100] = 0xAB;
        page_update_checksum(&mut page);
        assert!(page_verify_checksum(&page, 5).is_ok());

        page[100] ^= 0x01;
        let err = page_verify_checksum(&page, 5).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn checksum_field_itself_excluded() {
        let mut page = vec![0u8; 4096];
        page[0] = 1;
        let before = slotted_checksum(&page);
        page_update_checksum(&mut page);
        // Запись суммы не меняет вычисляемое значение.
        assert_eq!(slotted_checksum(&page), before);
    }
}
