//! pager/alloc — выделение и освобождение страниц.
//!
//! Свободные страницы образуют односвязную цепочку через next_free в теле
//! страницы; голова цепочки — в заголовке файла. Последовательности (>1)
//! выделяются только из хвоста файла: overflow-цепочкам нужна непрерывность
//! page_id.
//!
//! next_page_id/free_list_head меняются в памяти; на диск заголовок уходит
//! по политике pager/core.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{FREE_OFF_NEXT, NO_PAGE, PAGE_TYPE_FREE};
use crate::errors::{GaldrError, Result};

use super::core::Pager;

impl Pager {
    /// Выделить одну страницу: сперва free-лист, затем хвост файла.
    pub fn allocate_page(&self) -> Result<u32> {
        // Голова free-листа снимается под блокировкой заголовка; чтение
        // самой страницы — вне её, страница уже наша.
        let reused = {
            let mut st = self.state.lock().expect("header lock poisoned");
            if st.free_list_head_page_id != NO_PAGE {
                let pid = st.free_list_head_page_id;
                // next прочитаем ниже; пока помечаем голову как занятую.
                st.free_list_head_page_id = NO_PAGE; // временно, восстановим next
                Some(pid)
            } else {
                None
            }
        };

        if let Some(pid) = reused {
            let mut buf = vec![0u8; self.page_size() as usize];
            self.read_page(pid, &mut buf)?;
            if buf[0] != PAGE_TYPE_FREE {
                return Err(GaldrError::corruption(format!(
                    "free-list head {} is not a free page (type {})",
                    pid, buf[0]
                )));
            }
            let next = LittleEndian::read_u32(&buf[FREE_OFF_NEXT..]);
            self.update_header(|h| h.free_list_head_page_id = next);
            return Ok(pid);
        }

        let mut st = self.state.lock().expect("header lock poisoned");
        let pid = st.next_page_id;
        st.next_page_id += 1;
        Ok(pid)
    }

    /// Выделить count последовательных страниц из хвоста файла.
    pub fn allocate_consecutive(&self, count: u32) -> Result<u32> {
        if count == 0 {
            return Err(GaldrError::invalid_arg("allocate_consecutive(0)"));
        }
        let mut st = self.state.lock().expect("header lock poisoned");
        let start = st.next_page_id;
        st.next_page_id += count;
        Ok(start)
    }

    /// Вернуть страницу во free-лист (прямая запись, вне транзакций:
    /// инициализация и vacuum).
    pub fn free_page(&self, page_id: u32) -> Result<()> {
        if page_id == 0 {
            return Err(GaldrError::invalid_arg("cannot free the header page"));
        }
        let head = self.header().free_list_head_page_id;
        let mut buf = vec![0u8; self.page_size() as usize];
        buf[0] = PAGE_TYPE_FREE;
        LittleEndian::write_u32(&mut buf[FREE_OFF_NEXT..], head);
        self.write_page(page_id, &mut buf)?;
        self.update_header(|h| h.free_list_head_page_id = page_id);
        Ok(())
    }
}
